//! Stage operations and the function registry

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use contracts::{StageName, StageParam};

/// In-process stage implementation, called with the stage params in order
pub type StageFn = Arc<dyn Fn(&[StageParam]) -> anyhow::Result<()> + Send + Sync>;

/// Program run for an external stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Executable {
    /// Executable shipped in the backend install directory
    Bundled(String),
    /// Program resolved as given (absolute path or `PATH` lookup)
    System(String),
}

/// What a stage does when it has to run
#[derive(Clone)]
pub enum StageOperation {
    /// Separate process; `leading_args` precede the stage params
    ExternalProcess {
        executable: Executable,
        leading_args: Vec<String>,
    },
    /// Named callable run on the blocking pool
    Function { name: String, handle: StageFn },
}

impl StageOperation {
    pub fn bundled(executable: impl Into<String>) -> Self {
        Self::ExternalProcess {
            executable: Executable::Bundled(executable.into()),
            leading_args: Vec::new(),
        }
    }

    pub fn system(program: impl Into<String>, leading_args: Vec<String>) -> Self {
        Self::ExternalProcess {
            executable: Executable::System(program.into()),
            leading_args,
        }
    }

    pub fn function(name: impl Into<String>, handle: StageFn) -> Self {
        Self::Function {
            name: name.into(),
            handle,
        }
    }
}

impl fmt::Debug for StageOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExternalProcess {
                executable,
                leading_args,
            } => f
                .debug_struct("ExternalProcess")
                .field("executable", executable)
                .field("leading_args", leading_args)
                .finish(),
            Self::Function { name, .. } => {
                f.debug_struct("Function").field("name", name).finish()
            }
        }
    }
}

/// Binds in-process stages to their implementations
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<StageName, (String, StageFn)>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `stage` to `handle`, replacing any previous binding
    pub fn register<F>(&mut self, stage: StageName, name: impl Into<String>, handle: F)
    where
        F: Fn(&[StageParam]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.functions
            .insert(stage, (name.into(), Arc::new(handle)));
    }

    /// Builder-style [`FunctionRegistry::register`]
    pub fn with<F>(mut self, stage: StageName, name: impl Into<String>, handle: F) -> Self
    where
        F: Fn(&[StageParam]) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(stage, name, handle);
        self
    }

    pub fn contains(&self, stage: StageName) -> bool {
        self.functions.contains_key(&stage)
    }

    /// Operation for a bound stage
    pub fn operation(&self, stage: StageName) -> Option<StageOperation> {
        self.functions
            .get(&stage)
            .map(|(name, handle)| StageOperation::function(name.clone(), Arc::clone(handle)))
    }
}

impl fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut stages: Vec<_> = self.functions.keys().collect();
        stages.sort();
        f.debug_struct("FunctionRegistry")
            .field("stages", &stages)
            .finish()
    }
}
