//! Carrier command construction: argument templates and program lookup.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use super::carrier::SpawnError;

/// Program, argument vector and extra environment for a carrier process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarrierCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CarrierCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for CarrierCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " \"{arg}\"")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Errors from rendering an argument template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("Unknown placeholder {{{name}}} in carrier argument {arg:?}")]
    UnknownPlaceholder { name: String, arg: String },

    #[error("Unterminated placeholder in carrier argument {arg:?}")]
    Unterminated { arg: String },
}

/// Values available to `{name}` placeholders.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: BTreeMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(name, value);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).map(String::as_str)
    }
}

/// An argument vector whose elements may contain `{name}` placeholders.
/// `{{` and `}}` produce literal braces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgTemplate {
    args: Vec<String>,
}

impl ArgTemplate {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn render(&self, vars: &TemplateVars) -> Result<Vec<String>, TemplateError> {
        self.args.iter().map(|arg| render_arg(arg, vars)).collect()
    }
}

fn render_arg(arg: &str, vars: &TemplateVars) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(arg.len());
    let mut chars = arg.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '{' if chars.peek() == Some(&'{') => {
                chars.next();
                out.push('{');
            }
            '}' if chars.peek() == Some(&'}') => {
                chars.next();
                out.push('}');
            }
            '{' => {
                let mut name = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    name.push(c);
                }
                if !closed {
                    return Err(TemplateError::Unterminated {
                        arg: arg.to_string(),
                    });
                }
                let value = vars
                    .get(name.trim())
                    .ok_or_else(|| TemplateError::UnknownPlaceholder {
                        name: name.clone(),
                        arg: arg.to_string(),
                    })?;
                out.push_str(value);
            }
            other => out.push(other),
        }
    }

    Ok(out)
}

/// Check that `program` can be launched: a path must name an existing
/// executable file, a bare name must resolve through `PATH` (and `PATHEXT`
/// on Windows). Returns the resolved path.
pub fn ensure_program_exists(program: &Path) -> Result<PathBuf, SpawnError> {
    let name = program.display().to_string();
    if program.as_os_str().is_empty() {
        return Err(SpawnError::ProgramNotFound { program: name });
    }

    let is_path = program.is_absolute() || program.components().count() > 1;
    match which::which(program) {
        Ok(resolved) => Ok(resolved),
        Err(_) if is_path && program.is_file() => Err(SpawnError::NotExecutable { program: name }),
        Err(_) => Err(SpawnError::ProgramNotFound { program: name }),
    }
}
