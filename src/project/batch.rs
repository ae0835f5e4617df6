//! Parallel processing of independent assemblies.

use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::{
    file::File,
    loader::{load_image, LoaderOptions},
    model::ModuleGraph,
    project::ResolutionCache,
    writer::{write, write_file, WriterOptions, WrittenImage},
    Error, Result,
};

enum Source {
    Path(PathBuf),
    Bytes(Vec<u8>),
}

struct Input {
    name: String,
    source: Source,
    /// Only registered in the cache, never mutated or written
    reference_only: bool,
}

/// Loads, mutates and writes a set of assemblies.
///
/// Every assembly gets its own [`ModuleGraph`]; the only state the workers share is
/// the [`ResolutionCache`], which is filled from all inputs (and any reference-only
/// assemblies) before the first graph is mutated, and only read afterwards.
///
/// A failing assembly is reported in its [`BatchItem`] and does not stop the others.
///
/// # Examples
///
/// ```rust,no_run
/// use cilweave::project::Batch;
///
/// let result = Batch::new()
///     .add_file("App.exe")?
///     .add_file("App.Core.dll")?
///     .with_reference("refs/System.Runtime.dll")?
///     .with_output_dir("out")
///     .run(|graph| {
///         graph.module.name = graph.module.name.to_lowercase();
///         Ok(())
///     });
///
/// for item in result.failures() {
///     eprintln!("{}: {:?}", item.name, item.outcome);
/// }
/// # Ok::<(), cilweave::Error>(())
/// ```
pub struct Batch {
    inputs: Vec<Input>,
    loader: LoaderOptions,
    writer: WriterOptions,
    cache: ResolutionCache,
    output_dir: Option<PathBuf>,
}

impl Default for Batch {
    fn default() -> Self {
        Self::new()
    }
}

impl Batch {
    /// An empty batch with default options and a cache seeded with the core
    /// library enums.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inputs: Vec::new(),
            loader: LoaderOptions::default(),
            writer: WriterOptions::default(),
            cache: ResolutionCache::with_core_library(),
            output_dir: None,
        }
    }

    /// Add an assembly to process.
    ///
    /// # Errors
    /// Returns an error if the path does not exist.
    pub fn add_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(Error::FileError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Input file does not exist: {}", path.display()),
            )));
        }
        self.inputs.push(Input {
            name: file_name(path),
            source: Source::Path(path.to_path_buf()),
            reference_only: false,
        });
        Ok(self)
    }

    /// Add an assembly held in memory, written as `name` when an output directory is
    /// set.
    #[must_use]
    pub fn add_bytes(mut self, name: &str, data: Vec<u8>) -> Self {
        self.inputs.push(Input {
            name: name.to_string(),
            source: Source::Bytes(data),
            reference_only: false,
        });
        self
    }

    /// Add an assembly that only contributes type facts to the cache.
    ///
    /// # Errors
    /// Returns an error if the path does not exist.
    pub fn with_reference<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        self = self.add_file(path)?;
        if let Some(input) = self.inputs.last_mut() {
            input.reference_only = true;
        }
        Ok(self)
    }

    /// Options for reading the inputs. The batch's cache replaces any cache they
    /// carry.
    #[must_use]
    pub fn with_loader_options(mut self, options: LoaderOptions) -> Self {
        self.loader = options;
        self
    }

    /// Options for writing the results. The batch's cache replaces any cache they
    /// carry.
    #[must_use]
    pub fn with_writer_options(mut self, options: WriterOptions) -> Self {
        self.writer = options;
        self
    }

    /// Start from an existing cache instead of an empty one.
    #[must_use]
    pub fn with_cache(mut self, cache: ResolutionCache) -> Self {
        self.cache = cache;
        self
    }

    /// Store every result in `dir` under its input's file name.
    #[must_use]
    pub fn with_output_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.output_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// The shared cache.
    #[must_use]
    pub fn cache(&self) -> &ResolutionCache {
        &self.cache
    }

    /// Warm the cache, then load, mutate and write every input in parallel.
    ///
    /// `mutate` runs once per graph on a worker thread. Its error, like any load or
    /// write error, is recorded for that assembly only.
    pub fn run<F>(self, mutate: F) -> BatchResult
    where
        F: Fn(&mut ModuleGraph) -> Result<()> + Sync,
    {
        let Batch {
            inputs,
            mut loader,
            mut writer,
            cache,
            output_dir,
        } = self;
        loader.cache = Some(cache.clone());
        writer.cache = Some(cache.clone());

        let opened: Vec<(Input, Result<File>)> = inputs
            .into_par_iter()
            .map(|input| {
                let file = match &input.source {
                    Source::Path(path) => File::from_file(path),
                    Source::Bytes(data) => File::from_mem(data.clone()),
                };
                (input, file)
            })
            .collect();

        let declarations = LoaderOptions {
            cache: Some(cache.clone()),
            ..LoaderOptions::declarations_only()
        };
        opened.par_iter().for_each(|(input, file)| {
            let Ok(file) = file else {
                return;
            };
            match load_image(file, &declarations) {
                Ok(graph) => cache.register(&graph),
                Err(error) => warn!("Batch: {} not registered - {}", input.name, error),
            }
        });
        info!("Batch: cache holds {} assemblies", cache.len());

        let items: Vec<BatchItem> = opened
            .into_par_iter()
            .filter(|(input, _)| !input.reference_only)
            .map(|(input, file)| {
                let outcome = file.and_then(|file| {
                    let mut graph = load_image(&file, &loader)?;
                    mutate(&mut graph)?;
                    match &output_dir {
                        Some(dir) => write_file(&graph, &writer, &dir.join(&input.name)),
                        None => write(&graph, &writer),
                    }
                });
                match &outcome {
                    Ok(image) => debug!("Batch: {} written ({} bytes)", input.name, image.bytes.len()),
                    Err(error) => warn!("Batch: {} failed - {}", input.name, error),
                }
                BatchItem {
                    name: input.name,
                    outcome,
                }
            })
            .collect();

        BatchResult { items }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |name| name.to_string_lossy().into_owned())
}

/// The outcome for one assembly of a batch.
#[derive(Debug)]
pub struct BatchItem {
    /// File name of the input
    pub name: String,
    /// The written image, or why there is none
    pub outcome: Result<WrittenImage>,
}

/// Outcomes of [`Batch::run`], in input order.
#[derive(Debug)]
pub struct BatchResult {
    /// One entry per processed (not reference-only) input
    pub items: Vec<BatchItem>,
}

impl BatchResult {
    /// Number of assemblies written.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.items.iter().filter(|item| item.outcome.is_ok()).count()
    }

    /// Number of assemblies that failed.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.items.len() - self.success_count()
    }

    /// Whether every assembly was written.
    #[must_use]
    pub fn is_complete_success(&self) -> bool {
        self.items.iter().all(|item| item.outcome.is_ok())
    }

    /// The failed items.
    pub fn failures(&self) -> impl Iterator<Item = &BatchItem> {
        self.items.iter().filter(|item| item.outcome.is_err())
    }

    /// The written image of `name`, if it succeeded.
    #[must_use]
    pub fn image(&self, name: &str) -> Option<&WrittenImage> {
        self.items
            .iter()
            .find(|item| item.name == name)
            .and_then(|item| item.outcome.as_ref().ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        loader::load,
        metadata::signatures::{FieldSig, TypeSig},
        model::flags::{FieldAttributes, TypeAttributes},
    };

    fn library(name: &str) -> Vec<u8> {
        let mut graph = ModuleGraph::new(&format!("{name}.dll"));
        graph.assembly = Some(crate::model::AssemblyDef {
            name: name.to_string(),
            ..Default::default()
        });
        let value_type = graph.core_type("System", "ValueType");
        let point = graph.add_type(name, "Point", TypeAttributes::PUBLIC, Some(value_type));
        graph.add_field(point, "X", FieldAttributes::PUBLIC, FieldSig { ty: TypeSig::I4 });
        write(&graph, &WriterOptions::default()).unwrap().bytes
    }

    #[test]
    fn every_input_is_processed_and_failures_stay_local() {
        let result = Batch::new()
            .add_bytes("A.dll", library("A"))
            .add_bytes("B.dll", library("B"))
            .add_bytes("Broken.dll", vec![0x4D, 0x5A, 0, 0])
            .run(|graph| {
                graph.module.name = format!("renamed-{}", graph.module.name);
                Ok(())
            });

        assert_eq!(result.items.len(), 3);
        assert_eq!(result.success_count(), 2);
        assert_eq!(result.failure_count(), 1);
        assert_eq!(result.failures().next().unwrap().name, "Broken.dll");

        let a = load(&result.image("A.dll").unwrap().bytes).unwrap();
        assert_eq!(a.module.name, "renamed-A.dll");
    }

    #[test]
    fn the_cache_is_warmed_from_every_input_first() {
        let batch = Batch::new()
            .add_bytes("A.dll", library("A"))
            .add_bytes("B.dll", library("B"));
        let cache = batch.cache().clone();

        let result = batch.run(|_| Ok(()));
        assert!(result.is_complete_success());
        assert_eq!(cache.is_value_type("A", "A.Point"), Some(true));
        assert_eq!(cache.is_value_type("B", "B.Point"), Some(true));
    }

    #[test]
    fn mutation_errors_are_reported_per_assembly() {
        let result = Batch::new()
            .add_bytes("A.dll", library("A"))
            .add_bytes("B.dll", library("B"))
            .run(|graph| {
                if graph.module.name == "B.dll" {
                    Err(Error::GraphError("refused".to_string()))
                } else {
                    Ok(())
                }
            });

        assert!(result.image("A.dll").is_some());
        assert!(matches!(
            result.failures().next().map(|item| &item.outcome),
            Some(Err(Error::GraphError(message))) if message == "refused"
        ));
    }

    #[test]
    fn missing_inputs_are_rejected_up_front() {
        assert!(Batch::new().add_file("/nonexistent/App.exe").is_err());
    }

    #[test]
    fn results_can_be_stored() {
        let dir = tempfile::tempdir().unwrap();
        let result = Batch::new()
            .add_bytes("A.dll", library("A"))
            .with_output_dir(dir.path())
            .run(|_| Ok(()));

        let stored = std::fs::read(dir.path().join("A.dll")).unwrap();
        assert_eq!(stored, result.image("A.dll").unwrap().bytes);
    }
}
