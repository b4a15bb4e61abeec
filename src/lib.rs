//! `catfit` fits a signal-plus-background model to a single kinematic variable in each analysis
//! category, stores the result in a named workspace, and writes a datacard per category for a
//! downstream limit-setting tool.
//!
//! # Workflow
//! For every category listed in the [`AnalysisConfig`](crate::config::AnalysisConfig):
//! 1. Read the observable from a TTree in a ROOT file ([`data::io::read_tree`]).
//! 2. Build the `Gauss+Pol` model inside a [`Workspace`](crate::workspace::Workspace) with a
//!    [`FitBuilder`](crate::builder::FitBuilder).
//! 3. Fit background-only (`nsig = 0`) and then signal-plus-background with an extended,
//!    unbinned likelihood ([`fit::fit_to`]), and store the stat-only significance.
//! 4. Write a plot artifact ([`plot::FitPlot`]).
//! 5. Rename the parameters to the datacard convention
//!    ([`NameFixer`](crate::workspace::NameFixer)) and write the workspace.
//! 6. Write the datacard ([`datacard::Datacard`]).
//!
//! ```rust,no_run
//! use catfit::{config::AnalysisConfig, pipeline::Pipeline};
//!
//! fn main() -> catfit::CatfitResult<()> {
//!     let pipeline = Pipeline::new(AnalysisConfig::default(), ".");
//!     pipeline.do_initial_fits()?;
//!     pipeline.check()?;
//!     pipeline.make_cards()?;
//!     Ok(())
//! }
//! ```
#![warn(clippy::perf, clippy::style)]
#![allow(clippy::excessive_precision)]

use thiserror::Error;

pub mod builder;
pub mod config;
pub mod data;
pub mod datacard;
pub mod fit;
pub mod likelihoods;
pub mod model;
pub mod pdfs;
pub mod pipeline;
pub mod plot;
pub mod utils;
pub mod workspace;

pub use builder::FitBuilder;
pub use config::AnalysisConfig;
pub use data::{Cut, Dataset, Observable};
pub use datacard::Datacard;
pub use fit::{fit_to, significance, FitOptions, FitResult};
pub use likelihoods::{MinimizerOptions, NLL};
pub use model::{Component, ExtendedModel, Parameter, ParameterSet};
pub use workspace::{NameFixer, Workspace};

/// The floating-point type used throughout the crate.
pub type Float = f64;

/// The mathematical constant $`\pi`$.
pub const PI: Float = std::f64::consts::PI;

/// Convenience alias for results carrying a [`CatfitError`].
pub type CatfitResult<T> = Result<T, CatfitError>;

/// The error type used by all `catfit` methods
#[derive(Error, Debug)]
pub enum CatfitError {
    /// An alias for [`std::io::Error`].
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    /// An alias for [`shellexpand::LookupError`].
    #[error("Failed to expand path: {0}")]
    LookupError(#[from] shellexpand::LookupError<std::env::VarError>),
    /// An alias for [`serde_json::Error`].
    #[error("JSON Error: {0}")]
    JsonError(#[from] serde_json::Error),
    /// An alias for [`toml::de::Error`].
    #[error("Failed to read configuration: {0}")]
    TomlError(#[from] toml::de::Error),
    /// A file was given with an extension other than the one expected for its kind.
    #[error("Input not a .{expected} file: \"{path}\"")]
    WrongExtension {
        /// The offending path
        path: String,
        /// The extension which was expected (without the dot)
        expected: String,
    },
    /// A file could not be opened.
    #[error("Cannot open file \"{path}\": {reason}")]
    CannotOpen {
        /// The path which failed to open
        path: String,
        /// The underlying reason
        reason: String,
    },
    /// The requested tree is not present in the input file.
    #[error("Cannot get tree \"{name}\" from \"{path}\"")]
    MissingTree {
        /// Name of the tree
        name: String,
        /// The file which was searched
        path: String,
    },
    /// The requested branch is not present in the tree (or is not a scalar float/double).
    #[error("Cannot get branch \"{name}\" from tree \"{tree}\"")]
    MissingBranch {
        /// Name of the branch
        name: String,
        /// Name of the tree which was searched
        tree: String,
    },
    /// The workspace file does not contain a workspace by the requested name.
    #[error("Cannot get workspace \"{name}\" from \"{path}\"")]
    MissingWorkspace {
        /// Name of the workspace
        name: String,
        /// The file which was searched
        path: String,
    },
    /// A parameter lookup failed.
    #[error("No parameter with name \"{name}\"!")]
    ParameterNotFound {
        /// Name of the parameter which failed lookup
        name: String,
    },
    /// A pdf lookup failed.
    #[error("No pdf with name \"{name}\"!")]
    PdfNotFound {
        /// Name of the pdf which failed lookup
        name: String,
    },
    /// A dataset lookup failed.
    #[error("No dataset with name \"{name}\"!")]
    DatasetNotFound {
        /// Name of the dataset which failed lookup
        name: String,
    },
    /// An object was registered (or renamed) under a name which is already taken.
    #[error("An object by the name \"{name}\" is already registered in this workspace!")]
    RegistrationError {
        /// Name which is already in use
        name: String,
    },
    /// An error which occurs when the user tries to parse an invalid string of text, typically
    /// into an enum variant or a cut expression.
    #[error("Failed to parse string: \"{name}\" does not correspond to a valid \"{object}\"!")]
    ParseError {
        /// The string which was parsed
        name: String,
        /// The name of the object it failed to parse into
        object: String,
    },
    /// The configuration is internally inconsistent.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    /// A custom fallback error for errors too complex or too infrequent to warrant their own error
    /// category.
    #[error("{0}")]
    Custom(String),
}
