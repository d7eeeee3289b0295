// Configuration: resolving the variant namespace a dependency index is
// opened under.
//
// The program this was distilled from resolves its variant by `eval()`-ing
// a user-supplied Python expression against the environment. That's
// replaced here with an enumerated set of forms plus a small concatenation
// grammar -- no expression evaluator, no scripting engine, just string
// matching -- loaded the way `taut`'s `config.rs` loads its settings: walk
// up from a starting directory looking for `pyproject.toml`, read
// `[tool.testscope]`, fall back to defaults if nothing is found.

use std::path::Path;

use crate::types::Variant;

/// A resolved form of the variant expression. `EnvKey` and `Concat` are the
/// two shapes the original's `eval()` was almost always actually used for
/// in practice (read one environment variable, or glue it to a literal
/// suffix); anything fancier was never a documented use case worth keeping
/// as open-ended code execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VariantExpr {
    /// Always resolves to the same literal string.
    Fixed(String),
    /// Resolves to the value of the named environment variable, or
    /// `"default"` if it isn't set.
    EnvKey(String),
    /// `"${VAR}-literal"`: the named environment variable's value (or
    /// empty string if unset) followed by a fixed suffix.
    Concat { env_key: String, suffix: String },
}

impl VariantExpr {
    pub fn resolve(&self) -> Variant {
        match self {
            VariantExpr::Fixed(value) => Variant(value.clone()),
            VariantExpr::EnvKey(key) => {
                Variant(std::env::var(key).unwrap_or_else(|_| "default".to_string()))
            }
            VariantExpr::Concat { env_key, suffix } => {
                let prefix = std::env::var(env_key).unwrap_or_default();
                Variant(format!("{}{}", prefix, suffix))
            }
        }
    }

    /// Parse the small grammar: `"${ENV_VAR}-literal"` is a `Concat`, a
    /// bare `"${ENV_VAR}"` is an `EnvKey`, anything else is taken literally
    /// as `Fixed`.
    pub fn parse(expr: &str) -> Self {
        if let Some(rest) = expr.strip_prefix("${") {
            if let Some(end) = rest.find('}') {
                let env_key = rest[..end].to_string();
                let suffix = rest[end + 1..].to_string();
                return if suffix.is_empty() {
                    VariantExpr::EnvKey(env_key)
                } else {
                    VariantExpr::Concat { env_key, suffix }
                };
            }
        }
        VariantExpr::Fixed(expr.to_string())
    }
}

#[derive(Debug, Default)]
pub struct Config {
    pub run_variant_expr: Option<String>,
}

impl Config {
    /// Load configuration starting from `start_dir`, walking up parent
    /// directories until a `pyproject.toml` with a `[tool.testscope]`
    /// section is found. Returns the default (no configured variant
    /// expression) if none exists anywhere up the tree.
    pub fn load(start_dir: &Path) -> Self {
        let mut dir = if start_dir.is_file() {
            start_dir.parent().map(Path::to_path_buf)
        } else {
            Some(start_dir.to_path_buf())
        };

        while let Some(d) = dir {
            let pyproject = d.join("pyproject.toml");
            if pyproject.exists() {
                if let Ok(content) = std::fs::read_to_string(&pyproject) {
                    if let Some(config) = Self::parse(&content) {
                        return config;
                    }
                }
            }
            dir = d.parent().map(Path::to_path_buf);
        }

        Self::default()
    }

    fn parse(content: &str) -> Option<Self> {
        let doc: toml::Value = content.parse().ok()?;
        let section = doc.get("tool")?.get("testscope")?;

        let run_variant_expr = section
            .get("run_variant_expr")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        Some(Self { run_variant_expr })
    }

    pub fn resolve_variant(&self) -> Variant {
        match &self.run_variant_expr {
            Some(expr) => VariantExpr::parse(expr).resolve(),
            None => Variant::default(),
        }
    }
}
