//! Placeholder substitution for command templates.
//!
//! Templates use `{name}` placeholders; `{{` and `}}` produce literal braces.
//! A substituted value is itself rendered again, so a target's command prefix
//! may refer to benchmark or permutation keys.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::core::{Permutation, Target};

/// Nesting limit for recursive substitution.
pub const MAX_DEPTH: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("unknown placeholder '{{{key}}}' in template '{template}'")]
    UnknownPlaceholder { key: String, template: String },
    #[error("unbalanced brace at offset {offset} in template '{template}'")]
    UnbalancedBrace { offset: usize, template: String },
    #[error("substitution nested too deeply in template '{0}'")]
    RecursionLimit(String),
    #[error("unbalanced quotes in command '{0}'")]
    UnbalancedQuotes(String),
}

/// Substitution context. Later insertions override earlier ones, so layers
/// are added from lowest to highest precedence.
#[derive(Debug, Clone, Default)]
pub struct Substitutions {
    values: BTreeMap<String, String>,
}

impl Substitutions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.values.insert(key.into(), value.into());
        self
    }

    /// Add a whole layer on top of the current values.
    pub fn layer<K, V>(&mut self, values: impl IntoIterator<Item = (K, V)>) -> &mut Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in values {
            self.values.insert(k.into(), v.into());
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Context for one benchmark invocation: benchmark attributes, then the
    /// target, then the permutation fields, then run metadata.
    pub fn for_run(
        benchmark: &BTreeMap<String, String>,
        target: &Target,
        perm: &Permutation,
        run: usize,
    ) -> Self {
        let mut subs = Substitutions::new();
        subs.layer(benchmark.clone())
            .layer(target.substitutions())
            .layer(perm.fields().map(|(k, v)| (k, v.to_string())))
            .set("run", run.to_string())
            .set("target", target.name.clone())
            .set("perm", perm.joined());
        subs
    }

    /// Context for server commands, rendered before any permutation is known.
    pub fn for_server(benchmark: &BTreeMap<String, String>, target: &Target, run: usize) -> Self {
        let mut subs = Substitutions::new();
        subs.layer(benchmark.clone())
            .layer(target.substitutions())
            .set("run", run.to_string())
            .set("target", target.name.clone())
            .set("perm", "none");
        subs
    }

    pub fn render(&self, template: &str) -> Result<String, TemplateError> {
        render(template, self)
    }

    /// Render a command template and split it into shell-style words.
    pub fn render_argv(&self, template: &str) -> Result<Vec<String>, TemplateError> {
        let rendered = self.render(template)?;
        shlex::split(&rendered).ok_or(TemplateError::UnbalancedQuotes(rendered))
    }
}

/// Render `template` against `subs`.
pub fn render(template: &str, subs: &Substitutions) -> Result<String, TemplateError> {
    render_at(template, subs, 0)
}

fn render_at(template: &str, subs: &Substitutions, depth: usize) -> Result<String, TemplateError> {
    if depth > MAX_DEPTH {
        return Err(TemplateError::RecursionLimit(template.to_string()));
    }

    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();

    while let Some((offset, c)) = chars.next() {
        match c {
            '{' if matches!(chars.peek(), Some((_, '{'))) => {
                chars.next();
                out.push('{');
            }
            '}' if matches!(chars.peek(), Some((_, '}'))) => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut key = String::new();
                let mut closed = false;
                for (_, k) in chars.by_ref() {
                    if k == '}' {
                        closed = true;
                        break;
                    }
                    if k == '{' {
                        break;
                    }
                    key.push(k);
                }
                if !closed {
                    return Err(TemplateError::UnbalancedBrace {
                        offset,
                        template: template.to_string(),
                    });
                }
                let value = subs.get(&key).ok_or_else(|| TemplateError::UnknownPlaceholder {
                    key: key.clone(),
                    template: template.to_string(),
                })?;
                if value.contains('{') || value.contains('}') {
                    out.push_str(&render_at(value, subs, depth + 1)?);
                } else {
                    out.push_str(value);
                }
            }
            '}' => {
                return Err(TemplateError::UnbalancedBrace {
                    offset,
                    template: template.to_string(),
                });
            }
            other => out.push(other),
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ParameterSpace;

    fn subs(pairs: &[(&str, &str)]) -> Substitutions {
        let mut s = Substitutions::new();
        s.layer(pairs.iter().copied());
        s
    }

    #[test]
    fn test_plain_substitution() {
        let s = subs(&[("threads", "4"), ("size", "64")]);
        assert_eq!(render("bench -t {threads} -s {size}", &s).unwrap(), "bench -t 4 -s 64");
    }

    #[test]
    fn test_escaped_braces() {
        let s = subs(&[("x", "1")]);
        assert_eq!(render("{{x}} = {x}", &s).unwrap(), "{x} = 1");
    }

    #[test]
    fn test_recursive_values() {
        let s = subs(&[("prefix", "numactl -C {cpus}"), ("cpus", "0-3")]);
        assert_eq!(render("{prefix} bench", &s).unwrap(), "numactl -C 0-3 bench");
    }

    #[test]
    fn test_unknown_placeholder() {
        let err = render("run {missing}", &subs(&[])).unwrap_err();
        assert!(matches!(err, TemplateError::UnknownPlaceholder { ref key, .. } if key == "missing"));
    }

    #[test]
    fn test_unbalanced_braces() {
        assert!(matches!(
            render("run {open", &subs(&[])),
            Err(TemplateError::UnbalancedBrace { offset: 4, .. })
        ));
        assert!(matches!(
            render("close} run", &subs(&[])),
            Err(TemplateError::UnbalancedBrace { offset: 5, .. })
        ));
    }

    #[test]
    fn test_render_argv_splits_words() {
        let s = subs(&[("prefix", "numactl -C 0"), ("msg", "a b")]);
        assert_eq!(
            s.render_argv("{prefix} sh -c 'echo {msg}'").unwrap(),
            vec!["numactl", "-C", "0", "sh", "-c", "echo a b"]
        );
        assert!(matches!(
            s.render_argv("sh -c 'oops"),
            Err(TemplateError::UnbalancedQuotes(_))
        ));
    }

    #[test]
    fn test_self_reference_hits_limit() {
        let s = subs(&[("a", "{a}")]);
        assert!(matches!(render("{a}", &s), Err(TemplateError::RecursionLimit(_))));
    }

    #[test]
    fn test_run_context_precedence() {
        let mut bench = BTreeMap::new();
        bench.insert("name".to_string(), "loop".to_string());
        bench.insert("threads".to_string(), "bench-default".to_string());
        bench.insert("target".to_string(), "shadowed".to_string());

        let mut target = Target::new("glibc").with_cmd_prefix("taskset {threads}");
        target.attrs.insert("threads".into(), "target-default".into());

        let space = ParameterSpace::default()
            .with_dimension("threads", [2i64])
            .with_dimension("size", [64i64]);
        let perm = space.iter().next().unwrap();

        let s = Substitutions::for_run(&bench, &target, &perm, 3);
        assert_eq!(s.get("threads"), Some("2"));
        assert_eq!(s.get("target"), Some("glibc"));
        assert_eq!(s.get("perm"), Some("64-2"));
        assert_eq!(s.get("run"), Some("3"));
        assert_eq!(s.render("{cmd_prefix} {name}").unwrap(), "taskset 2 loop");
    }

    #[test]
    fn test_server_context_has_no_permutation() {
        let s = Substitutions::for_server(&BTreeMap::new(), &Target::new("jemalloc"), 1);
        assert_eq!(s.get("perm"), Some("none"));
        assert_eq!(s.get("target"), Some("jemalloc"));
    }
}
