use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PropertyError {
    #[error("unresolved property ${{{0}}}")]
    Unresolved(String),
    #[error("property ${{{0}}} refers to itself")]
    Loop(String),
}

impl PropertyError {
    pub fn property(&self) -> &str {
        match self {
            PropertyError::Unresolved(p) | PropertyError::Loop(p) => p,
        }
    }
}

/// Substitutes `${...}` placeholders. Names are looked up as built-ins (`project.*`, `pom.*`),
///  then `env.*` from the environment snapshot, then the descriptor's (merged) properties.
///  Values may contain placeholders themselves.
pub struct PropertyResolver<'a> {
    builtins: BTreeMap<String, String>,
    properties: &'a BTreeMap<String, String>,
    environment: &'a BTreeMap<String, String>,
}

impl<'a> PropertyResolver<'a> {
    pub fn new(properties: &'a BTreeMap<String, String>, environment: &'a BTreeMap<String, String>) -> PropertyResolver<'a> {
        PropertyResolver {
            builtins: BTreeMap::new(),
            properties,
            environment,
        }
    }

    /// Registers `project.<name>` together with its legacy alias `pom.<name>`
    pub fn with_project_value(mut self, name: &str, value: &str) -> Self {
        self.builtins.insert(format!("project.{}", name), value.to_string());
        self.builtins.insert(format!("pom.{}", name), value.to_string());
        self
    }

    pub fn interpolate(&self, text: &str) -> Result<String, PropertyError> {
        let mut in_progress = Vec::new();
        self.interpolate_nested(text, &mut in_progress)
    }

    pub fn interpolate_opt(&self, text: Option<&str>) -> Result<Option<String>, PropertyError> {
        text.map(|t| self.interpolate(t)).transpose()
    }

    fn interpolate_nested(&self, text: &str, in_progress: &mut Vec<String>) -> Result<String, PropertyError> {
        if !text.contains("${") {
            return Ok(text.to_string());
        }

        let mut result = String::with_capacity(text.len());
        let mut rest = text;
        while let Some(start) = rest.find("${") {
            let Some(len) = rest[start + 2..].find('}') else {
                // unterminated placeholders are literal text
                break;
            };
            result.push_str(&rest[..start]);
            let name = rest[start + 2..start + 2 + len].trim();
            result.push_str(&self.value_of(name, in_progress)?);
            rest = &rest[start + 2 + len + 1..];
        }
        result.push_str(rest);
        Ok(result)
    }

    fn value_of(&self, name: &str, in_progress: &mut Vec<String>) -> Result<String, PropertyError> {
        if in_progress.iter().any(|p| p == name) {
            return Err(PropertyError::Loop(name.to_string()));
        }

        let raw = self.builtins.get(name)
            .or_else(|| name.strip_prefix("env.").and_then(|n| self.environment.get(n)))
            .or_else(|| self.properties.get(name))
            .ok_or_else(|| PropertyError::Unresolved(name.to_string()))?;

        in_progress.push(name.to_string());
        let value = self.interpolate_nested(raw, in_progress);
        in_progress.pop();
        value
    }
}

#[cfg(test)]
mod test {
    use rstest::*;
    use super::*;

    fn properties() -> BTreeMap<String, String> {
        [
            ("lib.version", "1.2"),
            ("full.version", "${lib.version}.3"),
            ("a", "${b}"),
            ("b", "${a}"),
            ("self", "x${self}"),
        ].into_iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn environment() -> BTreeMap<String, String> {
        [("HOME".to_string(), "/home/mc".to_string())].into_iter().collect()
    }

    #[rstest]
    #[case::plain("1.0", Ok("1.0"))]
    #[case::property("${lib.version}", Ok("1.2"))]
    #[case::nested("v${full.version}-final", Ok("v1.2.3-final"))]
    #[case::builtin("${project.version}", Ok("7.0"))]
    #[case::pom_alias("${pom.groupId}:${project.artifactId}", Ok("org.acme:lib"))]
    #[case::env("${env.HOME}/repo", Ok("/home/mc/repo"))]
    #[case::unterminated("${lib.version", Ok("${lib.version"))]
    #[case::unknown("${nope}", Err(PropertyError::Unresolved("nope".to_string())))]
    #[case::unknown_env("${env.NOPE}", Err(PropertyError::Unresolved("env.NOPE".to_string())))]
    #[case::mutual_loop("${a}", Err(PropertyError::Loop("a".to_string())))]
    #[case::self_loop("${self}", Err(PropertyError::Loop("self".to_string())))]
    fn test_interpolate(#[case] text: &str, #[case] expected: Result<&str, PropertyError>) {
        let properties = properties();
        let environment = environment();
        let resolver = PropertyResolver::new(&properties, &environment)
            .with_project_value("groupId", "org.acme")
            .with_project_value("artifactId", "lib")
            .with_project_value("version", "7.0");

        assert_eq!(resolver.interpolate(text), expected.map(|s| s.to_string()));
    }
}
