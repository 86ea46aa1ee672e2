//! Environment context: variables exported by builders for later commands.

use crate::console::MASK;

/// A variable value tagged with whether it must be masked when rendered.
#[derive(Clone, PartialEq, Eq)]
pub struct EnvValue {
    value: String,
    secret: bool,
}

impl EnvValue {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: false,
        }
    }

    pub fn secret(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: true,
        }
    }

    /// The real value, for handing to subprocesses.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn is_secret(&self) -> bool {
        self.secret
    }

    /// The value as it may appear in a transcript.
    pub fn rendered(&self) -> &str {
        if self.secret {
            MASK
        } else {
            &self.value
        }
    }
}

impl std::fmt::Debug for EnvValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvValue")
            .field("value", &self.rendered())
            .field("secret", &self.secret)
            .finish()
    }
}

/// Whether [`EnvironmentContext::set`] created or replaced a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    Added,
    Overridden,
}

/// Insertion-ordered variable map scoped to one session execution.
///
/// Last write wins per key. Once a key has been marked secret it stays
/// secret for the rest of the session, even if overwritten with a plain value.
#[derive(Clone, Default)]
pub struct EnvironmentContext {
    vars: Vec<(String, EnvValue)>,
}

impl EnvironmentContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>, secret: bool) -> SetOutcome {
        let value = value.into();
        match self.vars.iter_mut().find(|(k, _)| k == name) {
            Some((_, existing)) => {
                let secret = secret || existing.secret;
                *existing = EnvValue { value, secret };
                SetOutcome::Overridden
            }
            None => {
                self.vars.push((name.to_string(), EnvValue { value, secret }));
                SetOutcome::Added
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&EnvValue> {
        self.vars.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Transcript line announcing the current value of `name`.
    pub fn announcement(&self, name: &str, outcome: SetOutcome) -> Option<String> {
        let rendered = self.get(name)?.rendered();
        Some(match outcome {
            SetOutcome::Added => {
                format!("setting environment variable '{name}' to value '{rendered}'")
            }
            SetOutcome::Overridden => {
                format!("overriding environment variable '{name}' with value '{rendered}'")
            }
        })
    }

    /// Raw `(name, value)` pairs in insertion order, for process spawning.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.value()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl std::fmt::Debug for EnvironmentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.vars.iter().map(|(k, v)| (k, v.rendered())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get_preserve_insertion_order() {
        let mut env = EnvironmentContext::new();
        env.set("P4PORT", "localhost:1666", false);
        env.set("P4USER", "admin", false);
        env.set("P4PORT", "perforce:1666", false);

        let pairs: Vec<_> = env.iter().collect();
        assert_eq!(pairs, vec![("P4PORT", "perforce:1666"), ("P4USER", "admin")]);
    }

    #[test]
    fn test_secret_flag_is_sticky() {
        let mut env = EnvironmentContext::new();
        assert_eq!(env.set("TOKEN", "abc", true), SetOutcome::Added);
        assert_eq!(env.set("TOKEN", "def", false), SetOutcome::Overridden);

        let value = env.get("TOKEN").unwrap();
        assert!(value.is_secret());
        assert_eq!(value.value(), "def");
        assert_eq!(value.rendered(), MASK);
    }

    #[test]
    fn test_announcement_masks_secret() {
        let mut env = EnvironmentContext::new();
        let outcome = env.set("P4PASSWD", "wubba lubba dub dub", true);
        assert_eq!(
            env.announcement("P4PASSWD", outcome).unwrap(),
            "setting environment variable 'P4PASSWD' to value '********'"
        );
    }

    #[test]
    fn test_announcement_for_override() {
        let mut env = EnvironmentContext::new();
        env.set("MODE", "a", false);
        let outcome = env.set("MODE", "b", false);
        assert_eq!(
            env.announcement("MODE", outcome).unwrap(),
            "overriding environment variable 'MODE' with value 'b'"
        );
    }

    #[test]
    fn test_debug_never_prints_secret_values() {
        let mut env = EnvironmentContext::new();
        env.set("P4PASSWD", "hunter2", true);
        env.set("P4USER", "admin", false);
        let debug = format!("{env:?}");
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("admin"));
    }
}
