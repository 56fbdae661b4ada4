//! Name → constructor tables for every swappable pipeline component.
//!
//! Each role has one statically declared table, so the set of valid
//! configuration values is enumerable and an unknown name fails at
//! resolution time with the role and the offending identifier.

use std::fmt;
use std::str::FromStr;

use log::debug;
use serde::de::DeserializeOwned;

use crate::config::{FormatterConfig, GeneralConfig, Kwargs};
use crate::data::cv::{CrossValidator, RepeatedKFold, RepeatedStratifiedKFold};
use crate::data::formatter::{ClassificationFormatter, Formatter, RegressionFormatter};
use crate::data::sampler::{SimpleSplitter, Splitter, StratifyAllSplitter};
use crate::error::{PipelineError, Result};
use crate::eval::ArtifactLogger;
use crate::eval::logger::{ArtifactLoggerClassification, ArtifactLoggerRegression};
use crate::eval::model::{DummyClassifier, DummyRegressor, Model};

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Formatter,
    Splitter,
    FeatureEngineer,
    ArtifactLogger,
    CrossValidator,
    ModelMethod,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Formatter,
        Role::Splitter,
        Role::FeatureEngineer,
        Role::ArtifactLogger,
        Role::CrossValidator,
        Role::ModelMethod,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Formatter => "formatter",
            Role::Splitter => "splitter",
            Role::FeatureEngineer => "feature-engineer",
            Role::ArtifactLogger => "artifact-logger",
            Role::CrossValidator => "cross-validator",
            Role::ModelMethod => "model-method",
        }
    }

    /// Every identifier registered under this role, in table order.
    pub fn identifiers(&self) -> Vec<&'static str> {
        fn names<T>(table: &[(&'static str, T)]) -> Vec<&'static str> {
            table.iter().map(|(name, _)| *name).collect()
        }
        match self {
            Role::Formatter => names(FORMATTERS),
            Role::Splitter => names(SPLITTERS),
            Role::FeatureEngineer => names(FEATURE_ENGINEERS),
            Role::ArtifactLogger => names(LOGGERS),
            Role::CrossValidator => names(VALIDATORS),
            Role::ModelMethod => names(METHODS),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str() == s)
            .ok_or_else(|| PipelineError::config(format!("unknown registry role '{s}'")))
    }
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

type FormatterCtor = fn(GeneralConfig, &FormatterConfig) -> Result<Box<dyn Formatter>>;
type Ctor<T> = fn(&str, &Kwargs) -> Result<T>;

const FORMATTERS: &[(&str, FormatterCtor)] = &[
    ("ClassificationFormatter", classification_formatter),
    ("RegressionFormatter", regression_formatter),
];

const SPLITTERS: &[(&str, Ctor<Box<dyn Splitter>>)] = &[
    ("SimpleSplitter", simple_splitter),
    ("StratifyAllSplitter", stratify_all_splitter),
];

const LOGGERS: &[(&str, Ctor<Box<dyn ArtifactLogger>>)] = &[
    ("ArtifactLoggerClassification", classification_logger),
    ("ArtifactLoggerRegression", regression_logger),
];

const VALIDATORS: &[(&str, Ctor<Box<dyn CrossValidator>>)] = &[
    ("RepeatedStratifiedKFold", repeated_stratified_kfold),
    ("RepeatedKFold", repeated_kfold),
];

fn classification_formatter(g: GeneralConfig, c: &FormatterConfig) -> Result<Box<dyn Formatter>> {
    Ok(Box::new(ClassificationFormatter::new(g, c)?))
}

fn regression_formatter(g: GeneralConfig, c: &FormatterConfig) -> Result<Box<dyn Formatter>> {
    Ok(Box::new(RegressionFormatter::new(g, c)?))
}

fn simple_splitter(id: &str, kw: &Kwargs) -> Result<Box<dyn Splitter>> {
    Ok(Box::new(SimpleSplitter::new(params(Role::Splitter, id, kw)?)?))
}

fn stratify_all_splitter(id: &str, kw: &Kwargs) -> Result<Box<dyn Splitter>> {
    Ok(Box::new(StratifyAllSplitter::new(params(Role::Splitter, id, kw)?)?))
}

fn classification_logger(id: &str, kw: &Kwargs) -> Result<Box<dyn ArtifactLogger>> {
    Ok(Box::new(ArtifactLoggerClassification::new(params(Role::ArtifactLogger, id, kw)?)))
}

fn regression_logger(id: &str, kw: &Kwargs) -> Result<Box<dyn ArtifactLogger>> {
    Ok(Box::new(ArtifactLoggerRegression::new(params(Role::ArtifactLogger, id, kw)?)))
}

fn repeated_stratified_kfold(id: &str, kw: &Kwargs) -> Result<Box<dyn CrossValidator>> {
    Ok(Box::new(RepeatedStratifiedKFold::new(params(Role::CrossValidator, id, kw)?)?))
}

fn repeated_kfold(id: &str, kw: &Kwargs) -> Result<Box<dyn CrossValidator>> {
    Ok(Box::new(RepeatedKFold::new(params(Role::CrossValidator, id, kw)?)?))
}

const FEATURE_ENGINEERS: &[(&str, Task)] = &[
    ("AutoFeatClassifier", Task::Classification),
    ("AutoFeatRegressor", Task::Regression),
    ("AutoSpectralIndicesClassification", Task::Classification),
];

const METHODS: &[(&str, MethodKind)] = &[
    ("SVC", MethodKind::Estimator(Task::Classification)),
    ("SVR", MethodKind::Estimator(Task::Regression)),
    ("XGBClassifier", MethodKind::Estimator(Task::Classification)),
    ("XGBRegressor", MethodKind::Estimator(Task::Regression)),
    ("RandomForestClassifier", MethodKind::Estimator(Task::Classification)),
    ("RandomForestRegressor", MethodKind::Estimator(Task::Regression)),
    ("PLS", MethodKind::Estimator(Task::Regression)),
    ("savgol", MethodKind::Transformer),
    ("PCA", MethodKind::Transformer),
    ("MSC", MethodKind::Transformer),
    ("DummyRegressor", MethodKind::Baseline(Task::Regression)),
    ("DummyClassifier", MethodKind::Baseline(Task::Classification)),
    ("StandardScaler", MethodKind::Transformer),
    ("MinMaxScaler", MethodKind::Transformer),
    ("PowerTransformer", MethodKind::Transformer),
];

/// Deserialize constructor arguments, naming the component on failure.
fn params<T: DeserializeOwned>(role: Role, identifier: &str, kwargs: &Kwargs) -> Result<T> {
    toml::Value::Table(kwargs.clone())
        .try_into()
        .map_err(|e| {
            PipelineError::config(format!("{role} '{identifier}': invalid arguments: {e}"))
        })
}

fn lookup<'t, T>(
    role: Role,
    table: &'t [(&'static str, T)],
    identifier: &str,
) -> Result<&'t (&'static str, T)> {
    table
        .iter()
        .find(|(name, _)| *name == identifier)
        .ok_or_else(|| {
            PipelineError::config(format!(
                "unknown {role} '{identifier}', expected one of {:?}",
                role.identifiers()
            ))
        })
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

pub fn resolve_formatter(
    identifier: &str,
    general: &GeneralConfig,
    cfg: &FormatterConfig,
) -> Result<Box<dyn Formatter>> {
    let (_, ctor) = lookup(Role::Formatter, FORMATTERS, identifier)?;
    debug!("resolving formatter '{identifier}'");
    ctor(general.clone(), cfg)
}

pub fn resolve_splitter(identifier: &str, kwargs: &Kwargs) -> Result<Box<dyn Splitter>> {
    let (_, ctor) = lookup(Role::Splitter, SPLITTERS, identifier)?;
    debug!("resolving splitter '{identifier}' with {kwargs:?}");
    ctor(identifier, kwargs)
}

pub fn resolve_logger(identifier: &str, kwargs: &Kwargs) -> Result<Box<dyn ArtifactLogger>> {
    let (_, ctor) = lookup(Role::ArtifactLogger, LOGGERS, identifier)?;
    ctor(identifier, kwargs)
}

pub fn resolve_validator(identifier: &str, kwargs: &Kwargs) -> Result<Box<dyn CrossValidator>> {
    let (_, ctor) = lookup(Role::CrossValidator, VALIDATORS, identifier)?;
    ctor(identifier, kwargs)
}

/// Learning task a component is meant for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Classification,
    Regression,
}

/// A feature-engineering stage chosen by configuration, run by the
/// external feature pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureEngineerDescriptor {
    pub identifier: &'static str,
    pub task: Task,
    pub kwargs: Kwargs,
}

pub fn resolve_feature_engineer(
    identifier: &str,
    kwargs: &Kwargs,
) -> Result<FeatureEngineerDescriptor> {
    let &(name, task) = lookup(Role::FeatureEngineer, FEATURE_ENGINEERS, identifier)?;
    Ok(FeatureEngineerDescriptor {
        identifier: name,
        task,
        kwargs: kwargs.clone(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    /// Fitted by the external trainer.
    Estimator(Task),
    /// Preprocessing step placed before an estimator.
    Transformer,
    /// Constant-prediction reference model, buildable in-process.
    Baseline(Task),
}

/// A model-method chosen by configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDescriptor {
    pub identifier: &'static str,
    pub kind: MethodKind,
    pub kwargs: Kwargs,
}

impl MethodDescriptor {
    /// Build a live model for the in-process baselines.
    pub fn build(&self) -> Result<Box<dyn Model>> {
        match self.identifier {
            "DummyClassifier" => Ok(Box::new(DummyClassifier::new(params(
                Role::ModelMethod,
                self.identifier,
                &self.kwargs,
            )?)?)),
            "DummyRegressor" => Ok(Box::new(DummyRegressor::new(params(
                Role::ModelMethod,
                self.identifier,
                &self.kwargs,
            )?)?)),
            other => Err(PipelineError::config(format!(
                "{} '{other}' is fitted by the external trainer and cannot be built here",
                Role::ModelMethod
            ))),
        }
    }
}

pub fn resolve_method(identifier: &str, kwargs: &Kwargs) -> Result<MethodDescriptor> {
    let &(name, kind) = lookup(Role::ModelMethod, METHODS, identifier)?;
    Ok(MethodDescriptor {
        identifier: name,
        kind,
        kwargs: kwargs.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kwargs(text: &str) -> Kwargs {
        toml::from_str(text).unwrap()
    }

    #[test]
    fn every_role_is_enumerable() {
        for role in Role::ALL {
            assert!(!role.identifiers().is_empty(), "{role}");
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert_eq!(
            Role::Splitter.identifiers(),
            vec!["SimpleSplitter", "StratifyAllSplitter"]
        );
        assert!("optimizer".parse::<Role>().is_err());
    }

    #[test]
    fn unknown_identifier_names_role_and_value() {
        let err = resolve_splitter("RandomSplitter", &Kwargs::new()).unwrap_err();
        assert!(err.is_configuration());
        let msg = err.to_string();
        assert!(msg.contains("splitter") && msg.contains("RandomSplitter"), "{msg}");

        let err = resolve_method("LinearSVC", &Kwargs::new()).unwrap_err();
        assert!(err.to_string().contains("model-method"));
        assert!(resolve_feature_engineer("PCA", &Kwargs::new()).is_err());
    }

    #[test]
    fn splitter_is_built_from_kwargs() {
        let kw = kwargs("train_ratio = 0.7\nval_ratio = 0.15\ntest_ratio = 0.15\nseed = 3\n");
        let splitter = resolve_splitter("SimpleSplitter", &kw).unwrap();
        assert_eq!(splitter.name(), "SimpleSplitter");

        let kw = kwargs("train_ratio = 0.7\nval_ratio = 0.1\ntest_ratio = 0.1\n");
        assert!(resolve_splitter("StratifyAllSplitter", &kw).unwrap_err().is_configuration());

        let err = resolve_splitter("SimpleSplitter", &kwargs("seed = 1\n")).unwrap_err();
        assert!(err.to_string().contains("invalid arguments"));
    }

    #[test]
    fn misspelled_kwargs_are_rejected() {
        let ratios = "train_ratio = 0.6\nval_ratio = 0.2\ntest_ratio = 0.2\n";
        let kw = kwargs(&format!("{ratios}stratfy = [\"treatments\"]\n"));
        let err = resolve_splitter("StratifyAllSplitter", &kw).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("stratfy"), "{err}");

        let kw = kwargs(&format!("{ratios}sede = 5\n"));
        assert!(resolve_splitter("SimpleSplitter", &kw).unwrap_err().is_configuration());

        let kw = kwargs("n_splits = 3\nn_repeats = 1\nrandom_sate = 2\n");
        assert!(resolve_validator("RepeatedKFold", &kw).unwrap_err().is_configuration());
        let kw = kwargs("ouput_dir = \"x\"\n");
        assert!(resolve_logger("ArtifactLoggerRegression", &kw).is_err());

        let method = resolve_method("DummyClassifier", &kwargs("stratgy = \"uniform\"\n")).unwrap();
        assert!(method.build().unwrap_err().is_configuration());
    }

    #[test]
    fn validators_and_loggers_resolve() {
        let cv = resolve_validator("RepeatedKFold", &kwargs("n_splits = 3\nn_repeats = 1\n")).unwrap();
        assert_eq!(cv.name(), "RepeatedKFold");
        assert!(resolve_logger("ArtifactLoggerRegression", &Kwargs::new()).is_ok());
        assert!(resolve_logger("MlflowLogger", &Kwargs::new()).is_err());
    }

    #[test]
    fn methods_resolve_to_specs() {
        let method = resolve_method("RandomForestClassifier", &kwargs("n_estimators = 200\n")).unwrap();
        assert_eq!(method.kind, MethodKind::Estimator(Task::Classification));
        assert_eq!(method.kwargs["n_estimators"].as_integer(), Some(200));
        assert!(method.build().unwrap_err().is_configuration());

        let method = resolve_method("DummyRegressor", &kwargs("strategy = \"median\"\n")).unwrap();
        assert_eq!(method.kind, MethodKind::Baseline(Task::Regression));
        assert!(method.build().is_ok());

        let fe = resolve_feature_engineer("AutoFeatRegressor", &Kwargs::new()).unwrap();
        assert_eq!(fe.task, Task::Regression);
    }
}
