//! The per-category container of observable, parameters, pdfs, models and data.
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    builder::{
        coefficient_name, BACKGROUND_PDF, MEAN_SHIFT, NBKG, NSIG, SIGNAL_PDF, WIDTH_SHIFT,
    },
    config::AnalysisConfig,
    data::{io::validate_input_file, Dataset, Observable},
    model::{ExtendedModel, Parameter, ParameterSet, Shape},
    CatfitError, CatfitResult, Float,
};

const WORKSPACE_EXTENSION: &str = "json";

/// A named container holding everything needed to evaluate and refit a category's model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workspace {
    /// Workspace name
    pub name: String,
    /// The fitted observable
    pub observable: Observable,
    parameters: ParameterSet,
    pdfs: IndexMap<String, Shape>,
    models: IndexMap<String, ExtendedModel>,
    datasets: IndexMap<String, Dataset>,
}

impl Workspace {
    /// An empty workspace over `observable`.
    pub fn new(name: &str, observable: Observable) -> Self {
        Self {
            name: name.to_string(),
            observable,
            parameters: ParameterSet::default(),
            pdfs: IndexMap::new(),
            models: IndexMap::new(),
            datasets: IndexMap::new(),
        }
    }

    /// Register a new parameter.
    pub fn factory(&mut self, parameter: Parameter) -> CatfitResult<()> {
        self.parameters.insert(parameter)
    }

    /// Register a constant, replacing any existing parameter by the same name.
    pub fn factory_constant(&mut self, name: &str, value: Float) {
        self.parameters.upsert(Parameter::constant(name, value));
    }

    /// Look up a parameter.
    pub fn var(&self, name: &str) -> CatfitResult<&Parameter> {
        self.parameters.get(name)
    }

    /// Look up a parameter mutably.
    pub fn var_mut(&mut self, name: &str) -> CatfitResult<&mut Parameter> {
        self.parameters.get_mut(name)
    }

    /// Every parameter in the workspace.
    pub fn parameters(&self) -> &ParameterSet {
        &self.parameters
    }

    /// Register a pdf. Every parameter it refers to must already exist.
    pub fn add_pdf(&mut self, name: &str, shape: Shape) -> CatfitResult<()> {
        if self.pdfs.contains_key(name) || self.models.contains_key(name) {
            return Err(CatfitError::RegistrationError {
                name: name.to_string(),
            });
        }
        for parameter in shape.parameters() {
            self.parameters.get(parameter)?;
        }
        self.pdfs.insert(name.to_string(), shape);
        Ok(())
    }

    /// Look up a pdf.
    pub fn pdf(&self, name: &str) -> CatfitResult<&Shape> {
        self.pdfs.get(name).ok_or_else(|| CatfitError::PdfNotFound {
            name: name.to_string(),
        })
    }

    /// Every pdf in the workspace.
    pub fn pdfs(&self) -> &IndexMap<String, Shape> {
        &self.pdfs
    }

    /// Register an extended model. Its components must already exist.
    pub fn add_model(&mut self, model: ExtendedModel) -> CatfitResult<()> {
        if self.pdfs.contains_key(&model.name) || self.models.contains_key(&model.name) {
            return Err(CatfitError::RegistrationError { name: model.name });
        }
        for component in &model.components {
            self.pdf(&component.pdf)?;
            self.var(&component.yield_param)?;
        }
        self.models.insert(model.name.clone(), model);
        Ok(())
    }

    /// Look up a model.
    pub fn model(&self, name: &str) -> CatfitResult<&ExtendedModel> {
        self.models.get(name).ok_or_else(|| CatfitError::PdfNotFound {
            name: name.to_string(),
        })
    }

    /// Import a dataset under its own name.
    pub fn import_dataset(&mut self, dataset: Dataset) -> CatfitResult<()> {
        if self.datasets.contains_key(&dataset.name) {
            return Err(CatfitError::RegistrationError { name: dataset.name });
        }
        if dataset.observable != self.observable.name {
            return Err(CatfitError::Custom(format!(
                "Dataset \"{}\" holds \"{}\" but the workspace observable is \"{}\"",
                dataset.name, dataset.observable, self.observable.name
            )));
        }
        self.datasets.insert(dataset.name.clone(), dataset);
        Ok(())
    }

    /// Look up a dataset.
    pub fn dataset(&self, name: &str) -> CatfitResult<&Dataset> {
        self.datasets
            .get(name)
            .ok_or_else(|| CatfitError::DatasetNotFound {
                name: name.to_string(),
            })
    }

    /// Rename a parameter and every reference to it in the pdfs and models.
    pub fn rename_parameter(&mut self, old: &str, new: &str) -> CatfitResult<()> {
        self.parameters.rename(old, new)?;
        for shape in self.pdfs.values_mut() {
            shape.rename_parameter(old, new);
        }
        for model in self.models.values_mut() {
            for component in &mut model.components {
                if component.yield_param == old {
                    component.yield_param = new.to_string();
                }
            }
        }
        Ok(())
    }

    /// Rename a pdf and every model component which refers to it.
    pub fn rename_pdf(&mut self, old: &str, new: &str) -> CatfitResult<()> {
        if old == new {
            return self.pdf(old).map(|_| ());
        }
        if self.pdfs.contains_key(new) || self.models.contains_key(new) {
            return Err(CatfitError::RegistrationError {
                name: new.to_string(),
            });
        }
        let index = self
            .pdfs
            .get_index_of(old)
            .ok_or_else(|| CatfitError::PdfNotFound {
                name: old.to_string(),
            })?;
        self.pdfs = self
            .pdfs
            .drain(..)
            .enumerate()
            .map(|(i, (key, shape))| {
                if i == index {
                    (new.to_string(), shape)
                } else {
                    (key, shape)
                }
            })
            .collect();
        for model in self.models.values_mut() {
            for component in &mut model.components {
                if component.pdf == old {
                    component.pdf = new.to_string();
                }
            }
        }
        Ok(())
    }

    /// Write the workspace to `path`, overwriting any existing file.
    ///
    /// The file holds a JSON object keyed by workspace name.
    pub fn write<P: AsRef<Path>>(&self, path: P) -> CatfitResult<()> {
        let path = path.as_ref();
        let mut contents: IndexMap<&str, &Workspace> = IndexMap::new();
        contents.insert(&self.name, self);
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, &contents)?;
        writer.flush()?;
        info!("I wrote the workspace: {}", path.display());
        Ok(())
    }

    /// Read the workspace named `name` from the file at `path`.
    ///
    /// # Errors
    /// The path must end in `.json` and name an existing file which holds a workspace by that
    /// name.
    pub fn read<P: AsRef<Path>>(path: P, name: &str) -> CatfitResult<Self> {
        let path = path.as_ref();
        validate_input_file(path, WORKSPACE_EXTENSION)?;
        let file = File::open(path).map_err(|err| CatfitError::CannotOpen {
            path: path.display().to_string(),
            reason: err.to_string(),
        })?;
        let mut contents: IndexMap<String, Workspace> =
            serde_json::from_reader(BufReader::new(file))?;
        debug!("{} holds workspaces {:?}", path.display(), contents.keys().collect::<Vec<_>>());
        contents
            .swap_remove(name)
            .ok_or_else(|| CatfitError::MissingWorkspace {
                name: name.to_string(),
                path: path.display().to_string(),
            })
    }
}

impl std::fmt::Display for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Workspace({}) contents", self.name)?;
        writeln!(f, "\nvariables")?;
        writeln!(f, "---------")?;
        writeln!(
            f,
            "{} [{}, {}] ({} bins)",
            self.observable.name, self.observable.min, self.observable.max, self.observable.bins
        )?;
        for parameter in self.parameters.iter() {
            writeln!(f, "{parameter}")?;
        }
        writeln!(f, "\np.d.f.s")?;
        writeln!(f, "-------")?;
        for (name, shape) in &self.pdfs {
            writeln!(f, "{name}({})", shape.parameters().join(", "))?;
        }
        for model in self.models.values() {
            let terms: Vec<String> = model
                .components
                .iter()
                .map(|c| format!("{} * {}", c.yield_param, c.pdf))
                .collect();
            writeln!(f, "{} = {}", model.name, terms.join(" + "))?;
        }
        writeln!(f, "\ndatasets")?;
        writeln!(f, "--------")?;
        for dataset in self.datasets.values() {
            writeln!(
                f,
                "{}({}) entries = {} weighted = {}",
                dataset.name,
                dataset.observable,
                dataset.n_events(),
                dataset.weighted_len()
            )?;
        }
        Ok(())
    }
}

/// Renames the parameters and pdfs built by the [`FitBuilder`](crate::builder::FitBuilder) to
/// the per-category names the datacard refers to.
pub struct NameFixer<'a> {
    ws: &'a mut Workspace,
    category: String,
    config: &'a AnalysisConfig,
}

impl<'a> NameFixer<'a> {
    /// Prepare to rename the objects of `ws`, which belongs to `category`, with the naming
    /// helpers (and parameter-name prefix) of `config`.
    pub fn new(ws: &'a mut Workspace, category: &str, config: &'a AnalysisConfig) -> Self {
        Self {
            ws,
            category: category.to_string(),
            config,
        }
    }

    /// The `(old, new)` parameter renames applied to the workspace of `category` for signal
    /// process `sig` and background process `bg`.
    pub fn renames(
        config: &AnalysisConfig,
        category: &str,
        sig: &str,
        bg: &str,
    ) -> Vec<(String, String)> {
        let mut renames = vec![
            (NSIG.to_string(), config.norm_name(sig, category)),
            (
                MEAN_SHIFT.to_string(),
                config.shape_param_name(sig, MEAN_SHIFT, category),
            ),
            (
                WIDTH_SHIFT.to_string(),
                config.shape_param_name(sig, WIDTH_SHIFT, category),
            ),
            (NBKG.to_string(), config.norm_name(bg, category)),
        ];
        renames.extend((0..config.background.order).map(|i| {
            let stem = coefficient_name(i);
            let new = config.shape_param_name(bg, &stem, category);
            (stem, new)
        }));
        renames
    }

    /// Apply the renames for signal process `sig` and background process `bg`.
    pub fn fix(self, sig: &str, bg: &str) -> CatfitResult<()> {
        for (old, new) in Self::renames(self.config, &self.category, sig, bg) {
            debug!("renaming {old} -> {new}");
            self.ws.rename_parameter(&old, &new)?;
        }
        for (pdf, process) in [(SIGNAL_PDF, sig), (BACKGROUND_PDF, bg)] {
            let new = self.config.pdf_name(process, &self.category);
            debug!("renaming pdf {pdf} -> {new}");
            self.ws.rename_pdf(pdf, &new)?;
        }
        Ok(())
    }
}
