use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};

// Dimension: one named axis of a Shape
//
// A dimension carries a name, a kind and a size. The kind decides how the
// dimension behaves in operations:
//
//   batch   : independent repeated instances, never consumed by an op
//   instance: an interacting collection of objects (particles, points)
//   channel : per-point property set (vector components, colors)
//   spatial : a grid axis
//
// The declaration order of the variants is the canonical shape order.

/// The kind of a dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DimKind {
    Batch,
    Instance,
    Channel,
    Spatial,
}

impl DimKind {
    pub const ALL: [DimKind; 4] = [
        DimKind::Batch,
        DimKind::Instance,
        DimKind::Channel,
        DimKind::Spatial,
    ];

    /// Infer a kind from a bare name, for keyword-style creation.
    ///
    /// `x`, `y`, `z`, `w` are spatial; `vector` and `~`-prefixed names are
    /// channel; names starting with `batch` are batch; anything else is an
    /// instance dimension.
    pub fn infer(name: &str) -> DimKind {
        match name {
            "x" | "y" | "z" | "w" => DimKind::Spatial,
            "vector" => DimKind::Channel,
            n if n.starts_with('~') => DimKind::Channel,
            n if n.starts_with("batch") => DimKind::Batch,
            _ => DimKind::Instance,
        }
    }

    /// One-letter tag used by `Display` of shapes.
    pub fn tag(&self) -> char {
        match self {
            DimKind::Batch => 'b',
            DimKind::Instance => 'i',
            DimKind::Channel => 'c',
            DimKind::Spatial => 's',
        }
    }
}

impl fmt::Display for DimKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DimKind::Batch => "batch",
            DimKind::Instance => "instance",
            DimKind::Channel => "channel",
            DimKind::Spatial => "spatial",
        };
        write!(f, "{s}")
    }
}

/// Size descriptor of a dimension.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Size {
    /// Known integer size.
    Fixed(usize),
    /// Unresolved size; matches any concrete size during merging.
    Symbolic,
    /// Per-slice sizes along the stacking dimension `along`.
    ///
    /// `sizes[i]` is the size of this dimension in slice `i` of `along`.
    NonUniform { along: String, sizes: Vec<usize> },
}

impl Size {
    /// The concrete size, if there is one.
    pub fn fixed(&self) -> Option<usize> {
        match self {
            Size::Fixed(n) => Some(*n),
            _ => None,
        }
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, Size::Fixed(_))
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self, Size::Symbolic)
    }

    pub fn is_non_uniform(&self) -> bool {
        matches!(self, Size::NonUniform { .. })
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Size::Fixed(n) => write!(f, "{n}"),
            Size::Symbolic => write!(f, "?"),
            Size::NonUniform { along, sizes } => write!(f, "{sizes:?}@{along}"),
        }
    }
}

impl From<usize> for Size {
    fn from(n: usize) -> Self {
        Size::Fixed(n)
    }
}

/// A named, typed axis.
///
/// Item names, when present, label every position along the axis; their
/// count always equals the fixed size.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dimension {
    name: String,
    kind: DimKind,
    size: Size,
    item_names: Option<Arc<[String]>>,
}

impl Dimension {
    pub fn new(name: impl Into<String>, kind: DimKind, size: impl Into<Size>) -> Self {
        Dimension {
            name: name.into(),
            kind,
            size: size.into(),
            item_names: None,
        }
    }

    /// A dimension whose size is the number of labels.
    pub fn with_items<S: Into<String>>(
        name: impl Into<String>,
        kind: DimKind,
        items: impl IntoIterator<Item = S>,
    ) -> Self {
        let items: Arc<[String]> = items.into_iter().map(Into::into).collect();
        Dimension {
            name: name.into(),
            kind,
            size: Size::Fixed(items.len()),
            item_names: Some(items),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> DimKind {
        self.kind
    }

    pub fn size(&self) -> &Size {
        &self.size
    }

    pub fn item_names(&self) -> Option<&[String]> {
        self.item_names.as_deref()
    }

    /// Position of a label along this dimension.
    pub fn item_index(&self, item: &str) -> Option<usize> {
        self.item_names.as_ref()?.iter().position(|n| n == item)
    }

    /// Replace the size, dropping labels that no longer fit.
    pub fn with_size(&self, size: impl Into<Size>) -> Self {
        let size = size.into();
        let keep_items = match (&self.item_names, size.fixed()) {
            (Some(items), Some(n)) => items.len() == n,
            _ => false,
        };
        Dimension {
            name: self.name.clone(),
            kind: self.kind,
            size,
            item_names: if keep_items {
                self.item_names.clone()
            } else {
                None
            },
        }
    }

    /// Replace the labels; the size becomes their count.
    pub fn with_item_names(&self, items: Option<Vec<String>>) -> Self {
        match items {
            Some(items) => Dimension {
                name: self.name.clone(),
                kind: self.kind,
                size: Size::Fixed(items.len()),
                item_names: Some(items.into()),
            },
            None => Dimension {
                item_names: None,
                ..self.clone()
            },
        }
    }

    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Dimension {
            name: name.into(),
            ..self.clone()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(Error::InvalidShape("dimension names must be non-empty".into()));
        }
        if let Some(items) = &self.item_names {
            match self.size {
                Size::Fixed(n) if n == items.len() => {}
                _ => {
                    return Err(Error::InvalidShape(format!(
                        "dimension '{}' has {} item names but size {}",
                        self.name,
                        items.len(),
                        self.size
                    )))
                }
            }
        }
        Ok(())
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}=", self.name, self.kind.tag())?;
        match &self.item_names {
            Some(items) => write!(f, "{}", items.join(",")),
            None => write!(f, "{}", self.size),
        }
    }
}

/// Right-hand side of a `name=...` pair in the dimension constructors.
///
/// `5` gives a size, `"x,y,z"` gives comma-separated item names (the size is
/// their count), `DimSpec::Symbolic` leaves the size unresolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DimSpec {
    Size(usize),
    Items(Vec<String>),
    Symbolic,
}

impl From<usize> for DimSpec {
    fn from(n: usize) -> Self {
        DimSpec::Size(n)
    }
}

impl From<&str> for DimSpec {
    fn from(s: &str) -> Self {
        DimSpec::Items(
            s.split(',')
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect(),
        )
    }
}

impl From<Vec<String>> for DimSpec {
    fn from(items: Vec<String>) -> Self {
        DimSpec::Items(items)
    }
}

impl From<Vec<&str>> for DimSpec {
    fn from(items: Vec<&str>) -> Self {
        DimSpec::Items(items.into_iter().map(String::from).collect())
    }
}

impl DimSpec {
    pub(crate) fn into_dimension(self, name: String, kind: DimKind) -> Dimension {
        match self {
            DimSpec::Size(n) => Dimension::new(name, kind, n),
            DimSpec::Items(items) => Dimension::with_items(name, kind, items),
            DimSpec::Symbolic => Dimension::new(name, kind, Size::Symbolic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_order_is_canonical() {
        assert!(DimKind::Batch < DimKind::Instance);
        assert!(DimKind::Instance < DimKind::Channel);
        assert!(DimKind::Channel < DimKind::Spatial);
    }

    #[test]
    fn test_infer_kind() {
        assert_eq!(DimKind::infer("x"), DimKind::Spatial);
        assert_eq!(DimKind::infer("vector"), DimKind::Channel);
        assert_eq!(DimKind::infer("~vector"), DimKind::Channel);
        assert_eq!(DimKind::infer("batch"), DimKind::Batch);
        assert_eq!(DimKind::infer("batch2"), DimKind::Batch);
        assert_eq!(DimKind::infer("particles"), DimKind::Instance);
    }

    #[test]
    fn test_items_from_str() {
        let d = DimSpec::from("x, y,z").into_dimension("vector".into(), DimKind::Channel);
        assert_eq!(d.size(), &Size::Fixed(3));
        assert_eq!(d.item_index("y"), Some(1));
        assert_eq!(d.item_index("w"), None);
        assert!(d.validate().is_ok());
    }

    #[test]
    fn test_with_size_drops_stale_items() {
        let d = Dimension::with_items("vector", DimKind::Channel, ["x", "y"]);
        assert!(d.with_size(2usize).item_names().is_some());
        assert!(d.with_size(1usize).item_names().is_none());
    }

    #[test]
    fn test_display() {
        let d = Dimension::with_items("vector", DimKind::Channel, ["x", "y"]);
        assert_eq!(d.to_string(), "vector:c=x,y");
        let s = Dimension::new("x", DimKind::Spatial, Size::Symbolic);
        assert_eq!(s.to_string(), "x:s=?");
    }
}
