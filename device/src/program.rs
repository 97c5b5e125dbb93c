//! Program loading and the program registry.
//!
//! [`ProgramBuilder::load`] reads an OpenCL C source file, compiles it for an
//! execution target with `-I`/`-D` options and keeps the result under the
//! original path. A compiler rejection is reported as
//! [`crate::Error::BuildFailed`] carrying the full build log; the failed
//! program stays registered so its state can still be inspected.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use snafu::ResultExt;
use tracing::{debug, info, warn};

use crate::backend::{Backend, BuildStatus, ComputeContext, DeviceProgram};
use crate::catalog::ExecutionTarget;
use crate::error::{BuildFailedSnafu, InvalidBuildOptionSnafu, ReadSourceSnafu, Result, StatusResultExt};
use crate::status::Status;

/// Compiler options assembled into `-I<dir> ... -D<definition> ...`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    include_dirs: Vec<PathBuf>,
    definitions: Vec<String>,
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts<I, P, D, S>(include_dirs: I, definitions: D) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
        D: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            include_dirs: include_dirs.into_iter().map(Into::into).collect(),
            definitions: definitions.into_iter().map(Into::into).collect(),
        }
    }

    /// Append an include directory. Paths containing whitespace are rejected
    /// by [`ProgramBuilder::load`].
    pub fn include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    /// Append a preprocessor definition (`NAME` or `NAME=VALUE`).
    pub fn define(mut self, definition: impl Into<String>) -> Self {
        self.definitions.push(definition.into());
        self
    }

    pub fn include_dirs(&self) -> &[PathBuf] {
        &self.include_dirs
    }

    pub fn definitions(&self) -> &[String] {
        &self.definitions
    }

    fn tokens(&self) -> impl Iterator<Item = String> + '_ {
        let includes = self.include_dirs.iter().map(|dir| format!("-I{}", dir.display()));
        let defines = self.definitions.iter().map(|def| format!("-D{def}"));
        includes.chain(defines)
    }
}

impl fmt::Display for BuildOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, token) in self.tokens().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            f.write_str(&token)?;
        }
        Ok(())
    }
}

/// Outcome of the last build of a registered program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramState {
    Built,
    BuildFailed,
}

/// A program compiled (or rejected) for one execution target.
#[derive(Debug)]
pub struct Program<B: Backend> {
    path: PathBuf,
    state: ProgramState,
    build_log: Option<String>,
    options: String,
    kernel_names: Vec<String>,
    handle: B::Program,
}

impl<B: Backend> Program<B> {
    /// Path the program was loaded from, as given to [`ProgramBuilder::load`].
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> ProgramState {
        self.state
    }

    pub fn is_built(&self) -> bool {
        self.state == ProgramState::Built
    }

    /// Compiler output of a failed build.
    pub fn build_log(&self) -> Option<&str> {
        self.build_log.as_deref()
    }

    /// Option string the program was built with.
    pub fn options(&self) -> &str {
        &self.options
    }

    /// Kernel entry points; empty unless built.
    pub fn kernel_names(&self) -> &[String] {
        &self.kernel_names
    }

    pub fn handle(&self) -> &B::Program {
        &self.handle
    }
}

/// Loads programs and keeps them keyed by source path.
#[derive(Debug)]
pub struct ProgramBuilder<B: Backend> {
    programs: HashMap<PathBuf, Program<B>>,
}

impl<B: Backend> Default for ProgramBuilder<B> {
    fn default() -> Self {
        Self { programs: HashMap::new() }
    }
}

impl<B: Backend> ProgramBuilder<B> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read, create and build the program at `path` for `target`.
    ///
    /// Loading the same path again replaces the registered program. Any error
    /// other than a compiler rejection drops the entry registered under `path`.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::ReadSource`] if the file cannot be read
    /// - [`crate::Error::InvalidBuildOption`] if an option token contains whitespace
    /// - [`crate::Error::BuildFailed`] if the compiler rejects the source;
    ///   the failed program stays registered
    /// - [`crate::Error::Api`] for any other non-success status
    #[tracing::instrument(skip_all, fields(path = %path.as_ref().display(), device = %target.device_info().name))]
    pub fn load(
        &mut self,
        target: &ExecutionTarget<B>,
        path: impl AsRef<Path>,
        options: &BuildOptions,
    ) -> Result<&Program<B>> {
        let path = path.as_ref();
        let program = match Self::build(target, path, options) {
            Ok(program) => program,
            Err(error) => {
                // A stale entry under this path no longer reflects what is on disk.
                self.programs.remove(path);
                return Err(error);
            }
        };

        let program = self.programs.entry(path.to_path_buf()).insert_entry(program).into_mut();
        if program.state == ProgramState::BuildFailed {
            let log = program.build_log.clone().unwrap_or_default();
            return BuildFailedSnafu { path, log }.fail();
        }
        Ok(program)
    }

    /// Compile `path` into a program that is either built or rejected.
    fn build(target: &ExecutionTarget<B>, path: &Path, options: &BuildOptions) -> Result<Program<B>> {
        if let Some(option) = options.tokens().find(|token| token.contains(char::is_whitespace)) {
            return InvalidBuildOptionSnafu { option }.fail();
        }

        let source = std::fs::read_to_string(path).context(ReadSourceSnafu { path })?;
        let handle = target.context().create_program(&source).api("clCreateProgramWithSource")?;

        let options = options.to_string();
        debug!(options = %options, source.len = source.len(), "building program");

        let mut program: Program<B> = Program {
            path: path.to_path_buf(),
            state: ProgramState::Built,
            build_log: None,
            options,
            kernel_names: Vec::new(),
            handle,
        };

        match program.handle.build(&program.options) {
            Ok(()) => {}
            Err(Status::BUILD_PROGRAM_FAILURE) => {
                let status = program.handle.build_status(target.device()).api("clGetProgramBuildInfo")?;
                if status != BuildStatus::Success {
                    let log = program.handle.build_log(target.device()).api("clGetProgramBuildInfo")?;
                    warn!(build.status = ?status, "program build failed:\n{log}");
                    program.state = ProgramState::BuildFailed;
                    program.build_log = Some(log);
                    return Ok(program);
                }
            }
            Err(status) => return Err(status).api("clBuildProgram"),
        }

        program.kernel_names = program.handle.kernel_names().api("clGetProgramInfo")?;
        info!(kernels = ?program.kernel_names, "program built");
        Ok(program)
    }

    pub fn program(&self, path: impl AsRef<Path>) -> Option<&Program<B>> {
        self.programs.get(path.as_ref())
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Program<B>> {
        self.programs.values()
    }
}
