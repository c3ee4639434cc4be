//! Substitution engine for $(env), $(optenv), $(find), $(anon) patterns

use crate::packages::PackageResolver;
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

/// Regex for matching substitution patterns: $(type value)
static SUBSTITUTION_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\((\w+)\s+([^)]+)\)|\$\((\w+)\)").unwrap());

/// Substitution context for a single launch document.
///
/// Anonymous ids are cached so that every occurrence of `$(anon foo)` in
/// one document resolves to the same generated name.
#[derive(Default)]
pub struct SubstitutionContext {
    /// Environment overrides consulted before the process environment
    pub env: HashMap<String, String>,
    resolver: Option<Arc<dyn PackageResolver>>,
    anon_ids: Mutex<HashMap<String, String>>,
}

impl SubstitutionContext {
    /// Create a new substitution context
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an environment override
    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(name.into(), value.into());
        self
    }

    /// Attach a package resolver for `$(find ...)` tokens
    pub fn with_resolver(mut self, resolver: Arc<dyn PackageResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Substitute all patterns in a string
    pub fn resolve_args(&self, input: &str) -> Result<String, SubstitutionError> {
        let mut result = input.to_string();
        let mut last_result = String::new();

        // Iterate until no more substitutions are made (handles values that
        // themselves expand to further substitutions)
        let max_iterations = 10;
        let mut iterations = 0;

        while result != last_result && iterations < max_iterations {
            last_result = result.clone();
            result = self.substitute_once(&result)?;
            iterations += 1;
        }

        if iterations >= max_iterations && result.contains("$(") {
            return Err(SubstitutionError::MaxIterationsExceeded(input.to_string()));
        }

        Ok(result)
    }

    /// Perform a single pass of substitution
    fn substitute_once(&self, input: &str) -> Result<String, SubstitutionError> {
        let mut error: Option<SubstitutionError> = None;

        let result = SUBSTITUTION_PATTERN.replace_all(input, |caps: &Captures| {
            if error.is_some() {
                return String::new();
            }

            match self.resolve_capture(caps) {
                Ok(value) => value,
                Err(e) => {
                    error = Some(e);
                    String::new()
                }
            }
        });

        if let Some(e) = error {
            return Err(e);
        }

        Ok(result.into_owned())
    }

    /// Resolve a single capture group
    fn resolve_capture(&self, caps: &Captures) -> Result<String, SubstitutionError> {
        // Pattern 1: $(type value) - e.g., $(env ROS_ROOT)
        if let (Some(subst_type), Some(value)) = (caps.get(1), caps.get(2)) {
            return self.resolve_typed(subst_type.as_str(), value.as_str().trim());
        }

        // Pattern 2: $(type) - bare token, always an error for this grammar
        if let Some(subst_type) = caps.get(3) {
            return Err(SubstitutionError::MissingOperand(
                subst_type.as_str().to_string(),
            ));
        }

        Err(SubstitutionError::InvalidPattern(
            caps.get(0)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default(),
        ))
    }

    /// Resolve a typed substitution
    fn resolve_typed(&self, subst_type: &str, value: &str) -> Result<String, SubstitutionError> {
        match subst_type {
            "env" => self.resolve_env(value),
            "optenv" => Ok(self.resolve_optenv(value)),
            "find" => self.resolve_find(value),
            "anon" => Ok(self.resolve_anon(value)),
            _ => Err(SubstitutionError::UnknownType(subst_type.to_string())),
        }
    }

    /// Resolve an environment variable reference
    fn resolve_env(&self, name: &str) -> Result<String, SubstitutionError> {
        if let Some(value) = self.env.get(name) {
            return Ok(value.clone());
        }
        std::env::var(name).map_err(|_| SubstitutionError::UndefinedEnv(name.to_string()))
    }

    /// Resolve an environment variable with a fallback default.
    /// Operand form: `VAR default words...`
    fn resolve_optenv(&self, operand: &str) -> String {
        let mut parts = operand.split_whitespace();
        let name = parts.next().unwrap_or_default();
        if let Ok(value) = self.resolve_env(name) {
            return value;
        }
        parts.collect::<Vec<_>>().join(" ")
    }

    /// Resolve a package directory reference
    fn resolve_find(&self, package: &str) -> Result<String, SubstitutionError> {
        let resolver = self
            .resolver
            .as_ref()
            .ok_or_else(|| SubstitutionError::NoResolver(package.to_string()))?;
        let dir = resolver
            .find_package(package)
            .ok_or_else(|| SubstitutionError::PackageNotFound(package.to_string()))?;
        Ok(dir.to_string_lossy().into_owned())
    }

    /// Resolve an anonymous name, stable within this context
    fn resolve_anon(&self, name: &str) -> String {
        let mut ids = self.anon_ids.lock().unwrap_or_else(|e| e.into_inner());
        ids.entry(name.to_string())
            .or_insert_with(|| format!("{}_{}", name, uuid::Uuid::new_v4().simple()))
            .clone()
    }
}

/// Errors that can occur during substitution
#[derive(Debug, thiserror::Error)]
pub enum SubstitutionError {
    #[error("Unknown substitution type: {0}")]
    UnknownType(String),

    #[error("Substitution $({0}) is missing its operand")]
    MissingOperand(String),

    #[error("Undefined environment variable: {0}")]
    UndefinedEnv(String),

    #[error("Cannot resolve $(find {0}): no package resolver configured")]
    NoResolver(String),

    #[error("Package not found: {0}")]
    PackageNotFound(String),

    #[error("Invalid substitution pattern: {0}")]
    InvalidPattern(String),

    #[error("Maximum substitution iterations exceeded for: {0}")]
    MaxIterationsExceeded(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    struct FixedResolver(PathBuf);

    impl PackageResolver for FixedResolver {
        fn find_package(&self, package: &str) -> Option<PathBuf> {
            (package == "vision").then(|| self.0.clone())
        }
    }

    #[test]
    fn test_env_substitution() {
        let ctx = SubstitutionContext::new().with_env("MY_VAR", "my_value");

        let result = ctx.resolve_args("$(env MY_VAR)").unwrap();
        assert_eq!(result, "my_value");
    }

    #[test]
    fn test_undefined_env_error() {
        let ctx = SubstitutionContext::new();

        let result = ctx.resolve_args("$(env ROBOLAUNCH_TEST_UNSET_VAR)");
        assert!(matches!(result, Err(SubstitutionError::UndefinedEnv(_))));
    }

    #[test]
    fn test_optenv_fallback() {
        let ctx = SubstitutionContext::new().with_env("SET_VAR", "set");

        assert_eq!(ctx.resolve_args("$(optenv SET_VAR fallback)").unwrap(), "set");
        assert_eq!(
            ctx.resolve_args("$(optenv ROBOLAUNCH_TEST_UNSET_VAR two words)")
                .unwrap(),
            "two words"
        );
    }

    #[test]
    fn test_find_substitution() {
        let ctx = SubstitutionContext::new()
            .with_resolver(Arc::new(FixedResolver(PathBuf::from("/opt/pkgs/vision"))));

        let result = ctx.resolve_args("$(find vision)/launch/cam.launch").unwrap();
        assert_eq!(result, "/opt/pkgs/vision/launch/cam.launch");

        let missing = ctx.resolve_args("$(find lidar)");
        assert!(matches!(missing, Err(SubstitutionError::PackageNotFound(_))));
    }

    #[test]
    fn test_anon_is_stable_within_context() {
        let ctx = SubstitutionContext::new();

        let a = ctx.resolve_args("$(anon cam)").unwrap();
        let b = ctx.resolve_args("$(anon cam)").unwrap();
        let c = ctx.resolve_args("$(anon other)").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("cam_"));
    }

    #[test]
    fn test_unknown_type_error() {
        let ctx = SubstitutionContext::new();

        let result = ctx.resolve_args("$(bogus thing)");
        assert!(matches!(result, Err(SubstitutionError::UnknownType(_))));
    }

    #[test]
    fn test_no_substitution_needed() {
        let ctx = SubstitutionContext::new();

        let result = ctx.resolve_args("plain string").unwrap();
        assert_eq!(result, "plain string");
    }

    #[test]
    fn test_multiple_tokens_in_one_value() {
        let ctx = SubstitutionContext::new()
            .with_env("A", "first")
            .with_env("B", "second");

        let result = ctx.resolve_args("$(env A)/$(env B)").unwrap();
        assert_eq!(result, "first/second");
    }
}
