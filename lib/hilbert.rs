//! Definitions to describe Hilbert-space components and compositions thereof.
//!
//! A [`ProductSpace`] is an ordered list of [`Component`]s; the position of a
//! component is its *acts-on* index, referenced by every operator built over
//! the space. Component indices are stable for the lifetime of a derivation.

use crate::operator::Parameter;

/// A discrete system with a finite set of named levels.
///
/// One level is designated the ground (reference) level; its projector is
/// eliminated against the completeness relation during normal ordering, so
/// populations of an `n`-level system are tracked by `n - 1` averages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NLevelSpace {
    name: String,
    levels: Vec<String>,
    ground: usize,
}

impl NLevelSpace {
    /// Create a new discrete space; the first level is the ground level.
    pub fn new<I, S>(name: &str, levels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.to_string(),
            levels: levels.into_iter().map(Into::into).collect(),
            ground: 0,
        }
    }

    /// Re-designate the ground level by name.
    ///
    /// Leaves the space unchanged if no level has the given name.
    pub fn with_ground(mut self, level: &str) -> Self {
        if let Some(k) = self.level_index(level) { self.ground = k; }
        self
    }

    pub fn name(&self) -> &str { &self.name }

    /// All declared level names, in declaration order.
    pub fn levels(&self) -> &[String] { &self.levels }

    pub fn num_levels(&self) -> usize { self.levels.len() }

    /// Index of the designated ground level.
    pub fn ground_state(&self) -> usize { self.ground }

    /// Resolve a level name to its index.
    pub fn level_index(&self, level: &str) -> Option<usize> {
        self.levels.iter().position(|l| l == level)
    }
}

/// A single bosonic mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FockSpace {
    name: String,
}

impl FockSpace {
    pub fn new(name: &str) -> Self { Self { name: name.to_string() } }

    pub fn name(&self) -> &str { &self.name }
}

/// `size` identical copies of an inner component, fully symmetric under
/// permutation of the copies.
///
/// The size is a declared [`Parameter`], not necessarily numeric at
/// derivation time. `order` bounds how many distinct member indices can
/// appear in any single average; it should be at least the cumulant order
/// used to close the system.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterSpace {
    inner: Box<Component>,
    size: Parameter,
    order: usize,
}

impl ClusterSpace {
    pub fn new(inner: Component, size: Parameter, order: usize) -> Self {
        Self { inner: Box::new(inner), size, order }
    }

    pub fn inner(&self) -> &Component { &self.inner }

    /// The symbolic cluster size.
    pub fn size(&self) -> &Parameter { &self.size }

    pub fn order(&self) -> usize { self.order }
}

/// An atomic quantum subsystem, or a permutation-symmetric cluster of them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Component {
    Fock(FockSpace),
    NLevel(NLevelSpace),
    Cluster(ClusterSpace),
}

impl From<FockSpace> for Component {
    fn from(s: FockSpace) -> Self { Self::Fock(s) }
}

impl From<NLevelSpace> for Component {
    fn from(s: NLevelSpace) -> Self { Self::NLevel(s) }
}

impl From<ClusterSpace> for Component {
    fn from(s: ClusterSpace) -> Self { Self::Cluster(s) }
}

impl Component {
    pub fn name(&self) -> &str {
        match self {
            Self::Fock(s) => s.name(),
            Self::NLevel(s) => s.name(),
            Self::Cluster(s) => s.inner().name(),
        }
    }

    pub fn is_cluster(&self) -> bool { matches!(self, Self::Cluster(_)) }

    pub fn as_cluster(&self) -> Option<&ClusterSpace> {
        match self {
            Self::Cluster(s) => Some(s),
            _ => None,
        }
    }

    /// The component ladder operators act on: the component itself, or the
    /// inner component of a cluster.
    pub fn inner_kind(&self) -> &Component {
        match self {
            Self::Cluster(s) => s.inner(),
            _ => self,
        }
    }

    /// Discrete-level structure of this component (or of a cluster's inner
    /// component), if any.
    pub fn nlevel(&self) -> Option<&NLevelSpace> {
        match self.inner_kind() {
            Self::NLevel(s) => Some(s),
            _ => None,
        }
    }

    /// `true` if this component (or a cluster's inner component) is a mode.
    pub fn is_fock_like(&self) -> bool {
        matches!(self.inner_kind(), Self::Fock(_))
    }

    /// Copy of this component with `sub` appended to its name; clusters
    /// rename their inner component.
    pub fn add_subscript(&self, sub: &str) -> Self {
        match self {
            Self::Fock(s)
                => Self::Fock(FockSpace::new(&format!("{}{}", s.name(), sub))),
            Self::NLevel(s) => {
                let mut renamed = NLevelSpace::new(
                    &format!("{}{}", s.name(), sub),
                    s.levels().iter().cloned(),
                );
                renamed.ground = s.ground;
                Self::NLevel(renamed)
            }
            Self::Cluster(s) => {
                Self::Cluster(ClusterSpace::new(
                    s.inner().add_subscript(sub),
                    s.size().clone(),
                    s.order(),
                ))
            }
        }
    }
}

/// An ordered composition of [`Component`]s.
///
/// Ordering is significant: the index of a component is the acts-on
/// identifier carried by every operator built over this space.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ProductSpace {
    components: Vec<Component>,
}

impl ProductSpace {
    /// Create a new, empty product space.
    pub fn new() -> Self { Self::default() }

    /// Append a component, returning its acts-on index.
    pub fn push<C: Into<Component>>(&mut self, component: C) -> usize {
        self.components.push(component.into());
        self.components.len() - 1
    }

    pub fn len(&self) -> usize { self.components.len() }

    pub fn is_empty(&self) -> bool { self.components.is_empty() }

    pub fn get(&self, index: usize) -> crate::Result<&Component> {
        self.components.get(index)
            .ok_or(crate::Error::UndeclaredComponent {
                index,
                len: self.components.len(),
            })
    }

    pub fn components(&self) -> &[Component] { &self.components }

    /// Iterate over `(index, component)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Component)> {
        self.components.iter().enumerate()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn level_lookup() {
        let atom = NLevelSpace::new("atom", ["g", "e"]);
        assert_eq!(atom.level_index("e"), Some(1));
        assert_eq!(atom.level_index("x"), None);
        assert_eq!(atom.ground_state(), 0);
        let atom = NLevelSpace::new("atom", ["g", "e"]).with_ground("e");
        assert_eq!(atom.ground_state(), 1);
    }

    #[test]
    fn space_indices_are_stable() {
        let mut space = ProductSpace::new();
        let cav = space.push(FockSpace::new("cavity"));
        let atoms = space.push(ClusterSpace::new(
            NLevelSpace::new("atom", ["g", "e"]).into(),
            Parameter::new("N"),
            2,
        ));
        assert_eq!((cav, atoms), (0, 1));
        assert!(space.get(0).unwrap().is_fock_like());
        assert!(space.get(1).unwrap().is_cluster());
        assert!(space.get(2).is_err());
        assert_eq!(space.get(1).unwrap().nlevel().unwrap().num_levels(), 2);
    }
}
