/// Trait for loading service configuration from environment variables.
///
/// Implementors derive `serde::Deserialize` and set [`Config::PREFIX`] when
/// their variables share one (e.g. `KAFKA_`). Field names map to the
/// upper-cased variable name after the prefix.
pub trait Config: Sized + serde::de::DeserializeOwned {
    /// Env var prefix stripped before field matching. Empty means none.
    const PREFIX: &'static str = "";

    /// Load from the process environment.
    ///
    /// # Panics
    ///
    /// Panics if any required env var is missing or cannot be deserialized.
    fn from_env() -> Self {
        Self::try_from_env().expect("failed to load config from environment")
    }

    fn try_from_env() -> Result<Self, envy::Error> {
        Self::from_vars(std::env::vars())
    }

    /// Load from an explicit set of `(name, value)` pairs.
    fn from_vars<I>(vars: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        if Self::PREFIX.is_empty() {
            envy::from_iter(vars)
        } else {
            envy::prefixed(Self::PREFIX).from_iter(vars)
        }
    }
}
