//! The per-category driver: fit, sanity check, and datacards.
use std::{
    fs,
    path::{Path, PathBuf},
};

use tracing::info;

use crate::{
    builder::{FitBuilder, MEAN, MODEL, NSIG, SIGMA, SIGNIFICANCE},
    config::AnalysisConfig,
    data::{io::read_tree, Cut, Dataset, Observable, DATASET_NAME},
    datacard::Datacard,
    fit::{fit_to, significance, FitOptions, FitResult},
    model::Parameter,
    plot::FitPlot,
    workspace::{NameFixer, Workspace},
    CatfitResult, Float,
};

/// The fits of a single category.
#[derive(Debug, Clone)]
pub struct CategoryFit {
    /// Category name
    pub category: String,
    /// Fit with the signal yield fixed at zero
    pub background_only: FitResult,
    /// Fit with the signal yield floating
    pub signal_plus_background: FitResult,
    /// Stat-only significance of the signal
    pub significance: Float,
}

/// What [`Pipeline::check`] reads back from a workspace file.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryCheck {
    /// Category name
    pub category: String,
    /// Fitted signal mean
    pub mean: Float,
    /// Error of the mean divided by the mean
    pub mean_frac_error: Float,
    /// Fitted signal width
    pub sigma: Float,
    /// Error of the width divided by the width
    pub sigma_frac_error: Float,
    /// Stat-only significance
    pub significance: Float,
}

fn frac_error(parameter: &Parameter) -> Float {
    parameter.error.unwrap_or(0.0) / parameter.value
}

/// Runs every step of the analysis over the configured categories, reading inputs relative to
/// the working directory and writing every output into one directory.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: AnalysisConfig,
    output_dir: PathBuf,
}

impl Pipeline {
    /// A pipeline writing into `output_dir`.
    pub fn new<P: AsRef<Path>>(config: AnalysisConfig, output_dir: P) -> Self {
        Self {
            config,
            output_dir: output_dir.as_ref().to_path_buf(),
        }
    }

    /// Read each category's events, fit them, and write the plot and workspace files.
    pub fn do_initial_fits(&self) -> CatfitResult<Vec<CategoryFit>> {
        self.config.validate()?;
        let observable = Observable::from_config(&self.config.observable)?;
        let cut = Cut::parse(&self.config.observable.cuts, &observable.name)?;
        let mut fits = Vec::with_capacity(self.config.events.len());
        for (category, file) in &self.config.events {
            info!("category {category}: reading {file}");
            let dataset = read_tree(
                file,
                &self.config.tree,
                &observable,
                &cut,
                self.config.weight_branch.as_deref(),
            )?;
            fits.push(self.fit_category(category, dataset)?);
        }
        Ok(fits)
    }

    /// Fit one category's dataset: build the model, fit background-only (signal yield and shape
    /// held) and then signal-plus-background, store the significance, write the plot, rename the
    /// parameters, and write the workspace.
    pub fn fit_category(&self, category: &str, dataset: Dataset) -> CatfitResult<CategoryFit> {
        let config = &self.config;
        config.validate()?;
        fs::create_dir_all(&self.output_dir)?;
        let observable = Observable::from_config(&config.observable)?;
        let mut ws = Workspace::new(&config.workspace, observable);
        info!(
            "category {category}: {} entries ({} weighted)",
            dataset.n_events(),
            dataset.weighted_len()
        );
        ws.import_dataset(dataset)?;
        FitBuilder::new(&mut ws, category)
            .with_signal(&config.signal)
            .with_background(&config.background)
            .build(&config.model)?;

        let options = FitOptions::from_config(&config.fit);
        ws.var_mut(NSIG)?.set_value(0.0);
        // with no signal the shape parameters have no effect on the likelihood
        for name in [NSIG, MEAN, SIGMA] {
            ws.var_mut(name)?.set_constant(true);
        }
        let background_only = fit_to(&mut ws, MODEL, DATASET_NAME, &options)?;
        info!("background-only fit:\n{background_only}");
        for name in [NSIG, MEAN, SIGMA] {
            ws.var_mut(name)?.set_constant(false);
        }
        let signal_plus_background = fit_to(&mut ws, MODEL, DATASET_NAME, &options)?;
        info!("signal-plus-background fit:\n{signal_plus_background}");

        let signif = significance(background_only.min_nll, signal_plus_background.min_nll);
        ws.factory_constant(SIGNIFICANCE, signif);
        info!("category {category}: significance = {signif:.4} (stat only)");

        FitPlot::from_workspace(&ws, category, MODEL, config.signal_window)?
            .write(self.output_dir.join(config.plot_file(category)))?;

        NameFixer::new(&mut ws, category, config).fix(config.sig(), config.bg())?;
        ws.write(self.output_dir.join(config.workspace_file(category)))?;

        Ok(CategoryFit {
            category: category.to_string(),
            background_only,
            signal_plus_background,
            significance: signif,
        })
    }

    /// Read every category's workspace back and confirm that the exported parameters exist.
    pub fn check(&self) -> CatfitResult<Vec<CategoryCheck>> {
        let config = &self.config;
        config.validate()?;
        let mut checks = Vec::with_capacity(config.events.len());
        for category in config.events.keys() {
            let ws = Workspace::read(
                self.output_dir.join(config.workspace_file(category)),
                &config.workspace,
            )?;
            info!("{ws}");
            for (_, name) in NameFixer::renames(config, category, config.sig(), config.bg()) {
                info!("{}", ws.var(&name)?);
            }
            let mean = ws.var(MEAN)?;
            let sigma = ws.var(SIGMA)?;
            let check = CategoryCheck {
                category: category.clone(),
                mean: mean.value,
                mean_frac_error: frac_error(mean),
                sigma: sigma.value,
                sigma_frac_error: frac_error(sigma),
                significance: ws.var(SIGNIFICANCE)?.value,
            };
            info!(
                "mean: {:.3}, frac err: {:.3}",
                check.mean, check.mean_frac_error
            );
            info!(
                "sigma: {:.3}, frac err: {:.3}",
                check.sigma, check.sigma_frac_error
            );
            info!("signif: {:.4}", check.significance);
            checks.push(check);
        }
        Ok(checks)
    }

    /// Write every category's datacard.
    pub fn make_cards(&self) -> CatfitResult<Vec<PathBuf>> {
        self.config.validate()?;
        fs::create_dir_all(&self.output_dir)?;
        self.config
            .events
            .keys()
            .map(|category| Datacard::from_config(&self.config, category).write(&self.output_dir))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CatfitError;

    #[test]
    fn missing_inputs_abort() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AnalysisConfig::default();
        config.events.clear();
        config
            .events
            .insert("amumu_1b1f".to_string(), "events.txt".to_string());
        let pipeline = Pipeline::new(config, dir.path());
        assert!(matches!(
            pipeline.do_initial_fits(),
            Err(CatfitError::WrongExtension { .. })
        ));
        assert!(matches!(
            pipeline.check(),
            Err(CatfitError::CannotOpen { .. })
        ));
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AnalysisConfig::default();
        config.processes.truncate(1);
        let pipeline = Pipeline::new(config, dir.path());
        assert!(matches!(
            pipeline.make_cards(),
            Err(CatfitError::InvalidConfig(_))
        ));
    }

    #[test]
    fn cards_for_every_category() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("cards");
        let pipeline = Pipeline::new(AnalysisConfig::default(), &out);
        let written = pipeline.make_cards().unwrap();
        assert_eq!(written.len(), 2);
        assert!(out.join("card_amumu_1b1f.txt").is_file());
        assert!(out.join("card_amumu_1b1c.txt").is_file());
    }
}
