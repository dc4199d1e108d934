use vela_core::{DataLayout, DataType, KernelError, TensorInfo};

/// How the shapes of the inputs of a kernel relate to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ShapeClass {
    /// Matches any input shapes.
    Any,
    /// Every input has the output shape.
    Same,
    /// At least one input is broadcast along some axis.
    Broadcast,
}

impl ShapeClass {
    /// Classifies the inputs of an n-ary kernel.
    pub fn of(inputs: &[&TensorInfo]) -> Self {
        match inputs.split_first() {
            Some((first, rest)) if rest.iter().any(|info| info.shape() != first.shape()) => {
                Self::Broadcast
            }
            _ => Self::Same,
        }
    }

    fn matches(&self, other: ShapeClass) -> bool {
        *self == Self::Any || *self == other
    }
}

/// What a kernel implementation is selected by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DispatchKey {
    /// Element type of the inputs.
    pub data_type: DataType,
    /// Data layout; [`DataLayout::Unknown`] in a table entry matches any layout.
    pub layout: DataLayout,
    /// Relation between the input shapes.
    pub shape_class: ShapeClass,
}

impl DispatchKey {
    /// A key matching any layout and shape class.
    pub fn data_type(data_type: DataType) -> Self {
        Self {
            data_type,
            layout: DataLayout::Unknown,
            shape_class: ShapeClass::Any,
        }
    }

    /// Restricts the key to `shape_class`.
    pub fn with_shape_class(mut self, shape_class: ShapeClass) -> Self {
        self.shape_class = shape_class;
        self
    }

    /// Restricts the key to `layout`.
    pub fn with_layout(mut self, layout: DataLayout) -> Self {
        self.layout = layout;
        self
    }

    fn matches(&self, query: &DispatchKey) -> bool {
        self.data_type == query.data_type
            && (self.layout == DataLayout::Unknown || self.layout == query.layout)
            && self.shape_class.matches(query.shape_class)
    }
}

impl std::fmt::Display for DispatchKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {:?})",
            self.data_type, self.layout, self.shape_class
        )
    }
}

/// Ordered list of implementations of one kernel.
///
/// Resolution returns the first entry whose key matches, so specific entries go
/// before generic ones. Kernels resolve once at configure time and keep the result.
#[derive(Debug, Clone)]
pub struct DispatchTable<F> {
    name: &'static str,
    entries: Vec<(DispatchKey, F)>,
}

impl<F: Copy> DispatchTable<F> {
    /// An empty table for the kernel `name`.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: Vec::new(),
        }
    }

    /// Appends an implementation.
    pub fn with(mut self, key: DispatchKey, f: F) -> Self {
        self.entries.push((key, f));
        self
    }

    /// Returns true if some entry matches `key`.
    pub fn supports(&self, key: &DispatchKey) -> bool {
        self.entries.iter().any(|(k, _)| k.matches(key))
    }

    /// The implementation for `key`.
    ///
    /// # Errors
    ///
    /// Returns an [`KernelError::Unsupported`] naming the key if no entry matches.
    #[track_caller]
    pub fn resolve(&self, key: &DispatchKey) -> Result<F, KernelError> {
        self.entries
            .iter()
            .find(|(k, _)| k.matches(key))
            .map(|(_, f)| *f)
            .ok_or_else(|| {
                KernelError::unsupported(format!("{} has no implementation for {key}", self.name))
            })
    }
}
