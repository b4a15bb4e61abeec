//! Fixed-column datacards for the downstream limit-setting tool.
use std::{
    fmt::Display,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    builder::{coefficient_name, MEAN_SHIFT, WIDTH_SHIFT},
    config::AnalysisConfig,
    CatfitResult, Float,
};

const SEPARATOR_WIDTH: usize = 68;

/// A number written into a datacard.
///
/// Integers and reals are kept apart so that `1` is written as `1` and `1.0` as `1.0`, the way
/// the values appear in the configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CardValue {
    /// An integer value
    Int(i64),
    /// A real value
    Real(Float),
}

impl Display for CardValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            CardValue::Int(value) => value.to_string(),
            CardValue::Real(value) => {
                if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e16 {
                    format!("{value:.1}")
                } else {
                    value.to_string()
                }
            }
        };
        f.pad(&text)
    }
}

/// A process column of the datacard.
#[derive(Debug, Clone, PartialEq)]
pub struct CardProcess {
    /// Process name
    pub name: String,
    /// Name of the pdf in the workspace which describes its shape
    pub pdf: String,
}

/// A Gaussian-constrained shape parameter (`param` line).
#[derive(Debug, Clone, PartialEq)]
pub struct ParamNuisance {
    /// Parameter name in the workspace
    pub name: String,
    /// Central value
    pub mean: CardValue,
    /// Width
    pub sigma: CardValue,
}

/// A log-normal yield uncertainty applied to every process (`lnN` line).
#[derive(Debug, Clone, PartialEq)]
pub struct LogNormalNuisance {
    /// Nuisance name
    pub name: String,
    /// Multiplicative uncertainty
    pub value: CardValue,
}

/// The datacard of a single category.
#[derive(Debug, Clone, PartialEq)]
pub struct Datacard {
    /// Leading comment
    pub title: String,
    /// Category (bin) name
    pub category: String,
    /// File name the card is written to
    pub file_name: String,
    /// File holding the workspace
    pub workspace_file: String,
    /// Name of the workspace inside the file
    pub workspace_name: String,
    /// Processes, signal first
    pub processes: Vec<CardProcess>,
    /// Observed yield (`-1` reads it from the workspace)
    pub observation: CardValue,
    /// Rate of every process
    pub rate: CardValue,
    /// Yield uncertainties
    pub yield_nuisances: Vec<LogNormalNuisance>,
    /// Constrained shape parameters
    pub param_nuisances: Vec<ParamNuisance>,
    /// Unconstrained floating parameters
    pub flat_params: Vec<String>,
}

impl Datacard {
    /// Assemble the datacard of `category` from the configuration. Every name in it is derived
    /// from the same helpers the [`NameFixer`](crate::workspace::NameFixer) uses.
    pub fn from_config(config: &AnalysisConfig, category: &str) -> Self {
        let sig = config.sig();
        let bg = config.bg();
        let processes = config
            .processes
            .iter()
            .map(|process| CardProcess {
                name: process.clone(),
                pdf: config.pdf_name(process, category),
            })
            .collect();
        let card = &config.datacard;
        let param_nuisances = vec![
            ParamNuisance {
                name: config.shape_param_name(sig, MEAN_SHIFT, category),
                mean: card.mass_shift.mean,
                sigma: card.mass_shift.sigma,
            },
            ParamNuisance {
                name: config.shape_param_name(sig, WIDTH_SHIFT, category),
                mean: card.width_shift.mean,
                sigma: card.width_shift.sigma,
            },
        ];
        let mut flat_params: Vec<String> = (0..config.background.order)
            .map(|i| config.shape_param_name(bg, &coefficient_name(i), category))
            .collect();
        flat_params.push(config.norm_name(bg, category));
        Self {
            title: card.title.clone(),
            category: category.to_string(),
            file_name: config.datacard_file(category),
            workspace_file: config.workspace_file(category),
            workspace_name: config.workspace.clone(),
            processes,
            observation: card.observation,
            rate: card.rate,
            yield_nuisances: vec![LogNormalNuisance {
                name: card.lumi.name.clone(),
                value: card.lumi.value,
            }],
            param_nuisances,
            flat_params,
        }
    }

    /// Render the datacard text.
    pub fn render(&self) -> String {
        let separator = "-".repeat(SEPARATOR_WIDTH);
        let mut lines: Vec<String> = Vec::new();

        lines.push(format!("# {}", self.title));
        lines.push("imax * number of channels".to_string());
        lines.push("jmax * number of processes minus 1".to_string());
        lines.push("kmax * number of nuisance parameters".to_string());
        lines.push(separator.clone());
        // only signal and background have their own pdfs; the rest fall through to `$PROCESS`
        for process in self.processes.iter().take(2) {
            lines.push(format!(
                "shapes {:<4} {:<4} {:<16} {}:{}",
                process.name, "*", self.workspace_file, self.workspace_name, process.pdf
            ));
        }
        lines.push(format!(
            "shapes {:<4} {:<4} {:<16} {}:{}",
            "*", "*", self.workspace_file, self.workspace_name, "$PROCESS"
        ));
        lines.push(separator.clone());

        lines.push(format!("{:<24} {:<12}", "bin", self.category));
        lines.push(format!("{:<24} {:<12}", "observation", self.observation));
        lines.push(separator.clone());

        let mut row = format!("{:<24} ", "bin");
        for _ in &self.processes {
            row += &format!("{:<12} ", self.category);
        }
        lines.push(row);
        let mut row = format!("{:<24} ", "process");
        for process in &self.processes {
            row += &format!("{:<12} ", process.name);
        }
        lines.push(row);
        let mut row = format!("{:<24} ", "process");
        for index in 0..self.processes.len() {
            row += &format!("{:>12} ", index);
        }
        lines.push(row);
        let mut row = format!("{:<24} ", "rate");
        for _ in &self.processes {
            row += &format!("{:>12} ", self.rate);
        }
        lines.push(row);
        lines.push(separator.clone());

        lines.push("# Uncertainties on yields".to_string());
        for nuisance in &self.yield_nuisances {
            let mut row = format!("{:<16} {:<8}", nuisance.name, "lnN");
            for _ in &self.processes {
                row += &format!("{:>12} ", nuisance.value);
            }
            lines.push(row);
        }
        lines.push(separator);

        lines.push("# Uncertainties on parameters".to_string());
        for nuisance in &self.param_nuisances {
            lines.push(format!(
                "{:<36} {:<10} {:>6} {:>6}",
                nuisance.name, "param", nuisance.mean, nuisance.sigma
            ));
        }
        for name in &self.flat_params {
            lines.push(format!("{:<36} {:<10}", name, "flatParam"));
        }
        lines.push("\n".to_string());

        lines.join("\n")
    }

    /// Write the datacard into `dir` under its file name, overwriting any existing file.
    pub fn write<P: AsRef<Path>>(&self, dir: P) -> CatfitResult<PathBuf> {
        let path = dir.as_ref().join(&self.file_name);
        fs::write(&path, self.render())?;
        info!("I wrote the datacard: {}", path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXPECTED_1B1F: &str = concat!(
        "# amumu analysis\n",
        "imax * number of channels\n",
        "jmax * number of processes minus 1\n",
        "kmax * number of nuisance parameters\n",
        "--------------------------------------------------------------------\n",
        "shapes sig  *    ws_amumu_1b1f.json ws_8TeV:CMS_amumu_sig_amumu_1b1f\n",
        "shapes bg   *    ws_amumu_1b1f.json ws_8TeV:CMS_amumu_bg_amumu_1b1f\n",
        "shapes *    *    ws_amumu_1b1f.json ws_8TeV:$PROCESS\n",
        "--------------------------------------------------------------------\n",
        "bin                      amumu_1b1f  \n",
        "observation              -1          \n",
        "--------------------------------------------------------------------\n",
        "bin                      amumu_1b1f   amumu_1b1f   \n",
        "process                  sig          bg           \n",
        "process                             0            1 \n",
        "rate                              1.0          1.0 \n",
        "--------------------------------------------------------------------\n",
        "# Uncertainties on yields\n",
        "#lumi_8TeV       lnN            1.026        1.026 \n",
        "--------------------------------------------------------------------\n",
        "# Uncertainties on parameters\n",
        "CMS_amumu_sig_mShift_amumu_1b1f      param           1   0.03\n",
        "CMS_amumu_sig_sigmaShift_amumu_1b1f  param           1   0.45\n",
        "CMS_amumu_bg_a0_amumu_1b1f           flatParam \n",
        "CMS_amumu_bg_a1_amumu_1b1f           flatParam \n",
        "CMS_amumu_bg_a2_amumu_1b1f           flatParam \n",
        "CMS_amumu_bg_amumu_1b1f_norm         flatParam \n",
        "\n",
    );

    #[test]
    fn card_value_display() {
        assert_eq!(CardValue::Int(1).to_string(), "1");
        assert_eq!(CardValue::Int(-1).to_string(), "-1");
        assert_eq!(CardValue::Real(1.0).to_string(), "1.0");
        assert_eq!(CardValue::Real(1.026).to_string(), "1.026");
        assert_eq!(CardValue::Real(0.03).to_string(), "0.03");
        assert_eq!(format!("{:>6}", CardValue::Real(0.45)), "  0.45");
        assert_eq!(format!("{:<4}|", CardValue::Int(7)), "7   |");
    }

    #[test]
    fn default_card_matches_template() {
        let config = AnalysisConfig::default();
        let card = Datacard::from_config(&config, "amumu_1b1f");
        assert_eq!(card.render(), EXPECTED_1B1F);
    }

    #[test]
    fn card_follows_process_list() {
        let mut config = AnalysisConfig::default();
        config.processes.push("dy".to_string());
        let text = Datacard::from_config(&config, "amumu_1b1c").render();
        assert!(!text.contains("shapes dy"));
        assert!(text.contains(
            "shapes bg   *    ws_amumu_1b1c.json ws_8TeV:CMS_amumu_bg_amumu_1b1c\n\
             shapes *    *    ws_amumu_1b1c.json ws_8TeV:$PROCESS\n"
        ));
        assert!(text.contains(
            "process                             0            1            2 \n"
        ));
        assert!(text.contains(
            "#lumi_8TeV       lnN            1.026        1.026        1.026 \n"
        ));
    }

    #[test]
    fn card_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnalysisConfig::default();
        let path = Datacard::from_config(&config, "amumu_1b1f")
            .write(dir.path())
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "card_amumu_1b1f.txt");
        assert_eq!(fs::read_to_string(path).unwrap(), EXPECTED_1B1F);
    }
}
