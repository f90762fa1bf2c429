//! The recursive object-graph driver.
//!
//! [`Compiler::compile`] runs the front end over one object, compiles the
//! objects it references depth-first, re-runs discovery on the parent once
//! every child is on the heap, merges the children and data files and
//! finishes the parent. [`Compiler::build`] wraps that in the analysis/final
//! restart used for unused-method elimination.

use std::io::Write;

use log::{debug, info};

use crate::{
    context::{CompileContext, ObjectNode, DEFAULT_EEPROM_SIZE, OBJECT_NESTING_LIMIT},
    data::DataError,
    diagnose::Diagnostic,
    frontend::{FrontEnd, PositionedError},
    heap::{HeapError, ObjectHeap},
    source::{LoadError, LoadErrorInner, Loader, SOURCE_EXTENSION},
    unused::UnusedMethods,
};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("{file} : error : Object nesting exceeds limit of {limit} levels.")]
    NestingLimitExceeded { file: String, limit: usize },

    #[error("{file} : error : Can not find/open file {}.", cause.path.display())]
    SourceUnavailable {
        file: String,
        #[source]
        cause: LoadError,
    },

    #[error("{file} : error : Unrecognized text encoding format.")]
    Encoding { file: String },

    #[error("{0}")]
    Positioned(Diagnostic),

    #[error("{file} : error : Object files exceed {}k.", limit / 1024)]
    CapacityExceeded { file: String, limit: usize },

    #[error("{file} : error : Object exceeds runtime memory limit by {longs} longs.")]
    MemoryLimitExceeded { file: String, longs: usize },

    #[error("{file} : error : Object Heap Overflow.")]
    HeapOverflow { file: String },

    #[error("{file} : error : Object references changed between discovery passes.")]
    Inconsistent { file: String },

    #[error("cannot write object tree: {0}")]
    Trace(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct Options {
    /// Suppresses the object tree trace.
    pub quiet: bool,
    /// Traces the object tree even when quiet.
    pub tree: bool,
    pub eliminate_unused: bool,
    /// Runtime memory budget of the root object, in bytes.
    pub eeprom_size: u32,
    /// Collects interface documentation.
    pub doc: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            quiet: false,
            tree: false,
            eliminate_unused: false,
            eeprom_size: DEFAULT_EEPROM_SIZE,
            doc: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Compiles everything to learn which methods are referenced.
    Analysis,
    /// Produces the output.
    Final,
}

/// Result of a successful build.
#[derive(Debug)]
pub struct Build {
    pub root: ObjectNode,
    /// The context as the root left it: its symbols plus the listing and
    /// documentation of every object.
    pub context: CompileContext,
}

/// Appends the source extension unless `name` already carries it.
pub fn with_source_extension(name: &str) -> String {
    let suffix = format!(".{}", SOURCE_EXTENSION);
    if name.contains(&suffix) {
        name.to_owned()
    } else {
        name.to_owned() + &suffix
    }
}

pub struct Compiler<F> {
    pub loader: Loader,
    pub front_end: F,
    pub options: Options,
    pub methods: UnusedMethods,
    trace: Box<dyn Write>,

    pass: Pass,
    ctx: CompileContext,
    heap: ObjectHeap,
    depth: usize,
    compile_index: usize,
    /// Compile indices of the objects currently being compiled.
    parents: Vec<usize>,
}

impl<F: FrontEnd> Compiler<F> {
    pub fn new(loader: Loader, front_end: F, options: Options) -> Self {
        Self {
            loader,
            front_end,
            options,
            methods: UnusedMethods::default(),
            trace: Box::new(std::io::stdout()),
            pass: Pass::Final,
            ctx: CompileContext::default(),
            heap: ObjectHeap::default(),
            depth: 0,
            compile_index: 0,
            parents: vec![],
        }
    }

    /// Sends the object tree trace to `trace` instead of stdout.
    pub fn with_trace(mut self, trace: impl Write + 'static) -> Self {
        self.trace = Box::new(trace);
        self
    }

    pub fn pass(&self) -> Pass {
        self.pass
    }

    /// Compiles the object graph rooted at `root`, twice when unused-method
    /// elimination is on.
    pub fn build(&mut self, root: &str) -> Result<Build, BuildError> {
        self.pass = if self.options.eliminate_unused {
            self.methods = UnusedMethods::default();
            Pass::Analysis
        } else {
            Pass::Final
        };

        loop {
            info!("{:?} pass over {}", self.pass, root);
            self.reset();
            self.compile(root)?;
            match self.pass {
                Pass::Analysis => {
                    let unused = self.methods.find_unused();
                    info!("restarting with {} unused methods removed", unused);
                    self.pass = Pass::Final;
                }
                Pass::Final => break,
            }
        }

        let node = self
            .heap
            .get(root)
            .cloned()
            .ok_or_else(|| BuildError::Inconsistent {
                file: root.to_owned(),
            })?;
        Ok(Build {
            root: node,
            context: std::mem::take(&mut self.ctx),
        })
    }

    fn reset(&mut self) {
        self.ctx = CompileContext::new(self.pass == Pass::Final, self.options.doc);
        self.heap.clear();
        self.depth = 0;
        self.compile_index = 0;
        self.parents.clear();
    }

    /// Compiles `filename` and everything below it, leaving the finished
    /// object on the heap under that name.
    pub fn compile(&mut self, filename: &str) -> Result<(), BuildError> {
        self.compile_index += 1;
        let index = self.compile_index;
        if self.depth > 0 && (!self.options.quiet || self.options.tree) {
            writeln!(self.trace, "{}...{}", "  ".repeat(self.depth), filename)?;
        }

        self.depth += 1;
        if self.depth > OBJECT_NESTING_LIMIT {
            return Err(BuildError::NestingLimitExceeded {
                file: filename.to_owned(),
                limit: OBJECT_NESTING_LIMIT,
            });
        }

        self.load(filename, index)?;
        if self.pass == Pass::Analysis {
            self.methods
                .record_instance(filename, index, self.parents.last().copied());
        }
        debug!("compiling {} (#{} at depth {})", filename, index, self.depth);
        self.discover()?;

        if !self.ctx.child_files.is_empty() {
            let child_files = self.ctx.child_files.clone();
            let data_files = self.ctx.data_files.clone();
            let children: Vec<String> = child_files
                .iter()
                .map(|name| with_source_extension(name))
                .collect();

            self.parents.push(index);
            for child in &children {
                self.compile(child)?;
            }
            self.parents.pop();

            // The children clobbered the context.
            self.load(filename, index)?;
            self.discover()?;
            if self.ctx.child_files != child_files || self.ctx.data_files != data_files {
                return Err(BuildError::Inconsistent {
                    file: filename.to_owned(),
                });
            }

            self.ctx.children = self
                .heap
                .merge(&children, self.ctx.code_size, self.ctx.limits.object)
                .map_err(|e| heap_error(filename, e))?;
        }

        for name in self.ctx.data_files.clone() {
            self.ctx
                .data
                .load(&mut self.loader, &name)
                .map_err(|e| match e {
                    DataError::Load(cause) => BuildError::SourceUnavailable {
                        file: filename.to_owned(),
                        cause,
                    },
                    DataError::Capacity { limit } => BuildError::CapacityExceeded {
                        file: filename.to_owned(),
                        limit,
                    },
                })?;
        }

        let finished = self.front_end.finish(&mut self.ctx, &self.methods);
        finished.map_err(|e| self.positioned(&e))?;

        let node = self.ctx.object_node();
        if self.depth == 1 {
            let footprint = node.footprint();
            let budget = self.options.eeprom_size as usize;
            if footprint > budget {
                return Err(BuildError::MemoryLimitExceeded {
                    file: filename.to_owned(),
                    longs: (footprint - budget) >> 2,
                });
            }
        }
        debug!(
            "finished {}: {} bytes code, {} bytes variables",
            filename,
            node.code_size(),
            node.var_size
        );

        self.heap
            .push(filename, node)
            .map_err(|e| heap_error(filename, e))?;
        self.depth -= 1;
        Ok(())
    }

    fn load(&mut self, filename: &str, index: usize) -> Result<(), BuildError> {
        let source = self.loader.load_source(filename).map_err(|cause| match cause.error {
            LoadErrorInner::Encoding => BuildError::Encoding {
                file: filename.to_owned(),
            },
            _ => BuildError::SourceUnavailable {
                file: filename.to_owned(),
                cause,
            },
        })?;
        self.ctx.begin_object(filename, index, source);
        Ok(())
    }

    fn discover(&mut self) -> Result<(), BuildError> {
        let discovered = self.front_end.discover(&mut self.ctx, &mut self.methods);
        discovered.map_err(|e| self.positioned(&e))
    }

    fn positioned(&self, error: &PositionedError) -> BuildError {
        BuildError::Positioned(Diagnostic::new(&self.ctx.filename, &self.ctx.source, error))
    }
}

fn heap_error(file: &str, error: HeapError) -> BuildError {
    let file = file.to_owned();
    match error {
        HeapError::Overflow => BuildError::HeapOverflow { file },
        HeapError::Capacity { limit } => BuildError::CapacityExceeded { file, limit },
        HeapError::Missing { .. } => BuildError::Inconsistent { file },
    }
}
