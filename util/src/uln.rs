use std::{
    fmt::{self, Debug, Display, Formatter},
    str::FromStr,
};

/// An unlocalized name is a two-part identifier composed of a namespace and identifier separated
/// by a colon, such as `engine:stone`. Registries key their entries by these names; the numeric
/// ids attached to them are only meaningful within a single session.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UnlocalizedName {
    /// The namespace of this unlocalized name.
    pub namespace: String,
    /// The identifier portion of this unlocalized name.
    pub identifier: String,
}

impl UnlocalizedName {
    /// The namespace assumed when a name is parsed without one.
    pub const DEFAULT_NAMESPACE: &'static str = "engine";

    /// Returns an unlocalized name in the default namespace with the given identifier.
    ///
    /// # Examples
    ///
    /// ```
    /// # use voxel_util::UnlocalizedName;
    /// let stone = UnlocalizedName::engine("stone");
    ///
    /// assert_eq!(stone.namespace, "engine");
    /// assert_eq!(stone.identifier, "stone");
    /// ```
    #[inline]
    pub fn engine(identifier: &str) -> UnlocalizedName {
        Self::new(Self::DEFAULT_NAMESPACE, identifier)
    }

    /// Returns an unlocalized name with the given namespace and identifier.
    #[inline]
    pub fn new(namespace: &str, identifier: &str) -> UnlocalizedName {
        UnlocalizedName {
            namespace: namespace.to_owned(),
            identifier: identifier.to_owned(),
        }
    }
}

impl FromStr for UnlocalizedName {
    type Err = &'static str;

    /// Parses the given string into an unlocalized name.
    ///
    /// A string without a colon is treated as a bare identifier in the default namespace. Strings
    /// of the form `namespace:` or `:identifier` are rejected.
    ///
    /// # Examples
    ///
    /// ```
    /// # use voxel_util::UnlocalizedName;
    /// # use std::str::FromStr;
    /// let stone = UnlocalizedName::from_str("engine:stone").unwrap();
    /// assert_eq!(stone.namespace, "engine");
    /// assert_eq!(stone.identifier, "stone");
    ///
    /// let dirt = UnlocalizedName::from_str("dirt").unwrap();
    /// assert_eq!(dirt.namespace, "engine");
    ///
    /// let glass = UnlocalizedName::from_str("deco:glass").unwrap();
    /// assert_eq!(glass.namespace, "deco");
    /// assert_eq!(glass.identifier, "glass");
    ///
    /// assert!(UnlocalizedName::from_str(":P").is_err());
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let index = match s.find(':') {
            Some(index) => index,
            None if s.is_empty() => return Err("Expected a non-empty identifier."),
            None => return Ok(Self::engine(s)),
        };

        if index == 0 || index == s.len() - 1 {
            Err("Expected two strings separated by a colon.")
        } else {
            Ok(Self::new(&s[.. index], &s[index + 1 ..]))
        }
    }
}

impl Display for UnlocalizedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.identifier)
    }
}

impl Debug for UnlocalizedName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}
