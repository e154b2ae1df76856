use std::path::{Path, PathBuf};

use crate::core::domain::Language;

/// Host binaries used to build and run each language.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Toolchain {
    pub python: PathBuf,
    pub node: PathBuf,
    pub javac: PathBuf,
    pub java: PathBuf,
    pub gxx: PathBuf,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            python: "python3".into(),
            node: "node".into(),
            javac: "javac".into(),
            java: "java".into(),
            gxx: "g++".into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Step {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Step {
    fn new(program: impl Into<PathBuf>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }
}

/// How one language is built and run inside a workspace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recipe {
    pub source_file: &'static str,
    /// Syntax check or real compilation; a failure here is a compile error.
    pub compile: Step,
    pub run: Step,
}

impl Toolchain {
    pub fn recipe(&self, language: Language, workspace: &Path) -> Recipe {
        match language {
            Language::Python => Recipe {
                source_file: "main.py",
                compile: Step::new(&self.python, &["-m", "py_compile", "main.py"]),
                run: Step::new(&self.python, &["main.py"]),
            },
            Language::JavaScript => Recipe {
                source_file: "main.js",
                compile: Step::new(&self.node, &["--check", "main.js"]),
                run: Step::new(&self.node, &["main.js"]),
            },
            Language::Java => Recipe {
                source_file: "Solution.java",
                compile: Step::new(&self.javac, &["Solution.java"]),
                run: Step::new(&self.java, &["-cp", ".", "Solution"]),
            },
            Language::Cpp => Recipe {
                source_file: "main.cpp",
                compile: Step::new(&self.gxx, &["-std=c++17", "-O2", "-o", "main", "main.cpp"]),
                // Path into the workspace; `ProcessSandbox` keeps its work dir absolute.
                run: Step::new(workspace.join("main"), &[]),
            },
        }
    }
}
