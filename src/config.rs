use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

// ---------------------------------------------------------------------------
// Canonical names
// ---------------------------------------------------------------------------

pub const DATE_ENG: &str = "dates";
pub const TREATMENT_ENG: &str = "treatments";
pub const BLOCK_ENG: &str = "blocks";
pub const PLANT_ENG: &str = "plants";
pub const VARIETY_ENG: &str = "varieties";

/// Headers used by the measurement sheets.
pub const DATE_SLO: &str = "Datum";
pub const TREATMENT_SLO: &str = "Poskus";
pub const BLOCK_SLO: &str = "Blok";
pub const PLANT_SLO: &str = "Rastlina";
pub const VARIETY_SLO: &str = "Sorta";

/// Columns that identify one measurement event.
pub const IDENTITY_COLUMNS: [&str; 5] = [DATE_ENG, TREATMENT_ENG, BLOCK_ENG, PLANT_ENG, VARIETY_ENG];

/// Measurement headers, positionally matching [`IDENTITY_COLUMNS`].
pub const MEASUREMENT_COLUMNS: [&str; 5] = [DATE_SLO, TREATMENT_SLO, BLOCK_SLO, PLANT_SLO, VARIETY_SLO];

/// Columns that identify one physical plant across dates.
pub const PLANT_GROUP_COLUMNS: [&str; 3] = [BLOCK_ENG, PLANT_ENG, VARIETY_ENG];

pub const DATE_FORMAT: &str = "%Y_%m_%d";
pub const RANDOM_SEED: u64 = 100;
pub const TRAIN_STR: &str = "train";
pub const TEST_STR: &str = "test";

pub const RESULTS_DIR: &str = "results";
pub const CONFIGS_DIR: &str = "configs";

const TOML_ENV_NAME: &str = "DATA_TOML_NAME";
const TOML_DEFAULT_FILE_NAME: &str = "clf/_base.toml";
const BASE_DIR_ENV_NAME: &str = "AGROSPEC_BASE_DIR";
const SAVE_DIR_ENV_NAME: &str = "AGROSPEC_SAVE_DIR";

/// Keyword arguments handed to a registry constructor.
pub type Kwargs = toml::Table;

// ---------------------------------------------------------------------------
// Process settings
// ---------------------------------------------------------------------------

/// Process-wide settings, built once at start-up and passed down explicitly.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub base_dir: PathBuf,
    pub toml_dir: PathBuf,
    pub toml_name: String,
    pub save_dir: PathBuf,
}

impl Settings {
    /// Defaults rooted at `base_dir`.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            toml_dir: base_dir.join("configs").join("specific"),
            toml_name: TOML_DEFAULT_FILE_NAME.to_string(),
            save_dir: base_dir.join("saved"),
            base_dir,
        }
    }

    /// Read overrides from the environment. Called once by the binary.
    pub fn from_env() -> Self {
        let base_dir = std::env::var_os(BASE_DIR_ENV_NAME)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        let mut settings = Self::new(base_dir);
        if let Ok(name) = std::env::var(TOML_ENV_NAME) {
            settings.toml_name = name;
        }
        if let Some(dir) = std::env::var_os(SAVE_DIR_ENV_NAME) {
            settings.save_dir = PathBuf::from(dir);
        }
        debug!("settings: {settings:?}");
        settings
    }

    /// Path of the experiment TOML selected by these settings.
    pub fn toml_path(&self) -> PathBuf {
        self.toml_dir.join(&self.toml_name)
    }
}

// ---------------------------------------------------------------------------
// Stage configs
// ---------------------------------------------------------------------------

/// Experimental design: admissible varieties, treatments and dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub varieties: BTreeSet<String>,
    pub treatments: BTreeSet<String>,
    pub dates: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormatterConfig {
    /// Registry identifier, e.g. `ClassificationFormatter`.
    pub formatter: String,
    #[serde(default)]
    pub classification_labels: Vec<String>,
    #[serde(default)]
    pub regression_label: Option<String>,
    /// measurement name → (target column, file path)
    #[serde(default)]
    pub measurements_paths: BTreeMap<String, (String, PathBuf)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    /// Registry identifier, e.g. `StratifyAllSplitter`.
    pub splitter: String,
    pub train_ratio: f64,
    pub val_ratio: f64,
    pub test_ratio: f64,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Splitter-specific keyword arguments.
    #[serde(flatten)]
    pub extra: Kwargs,
}

fn default_seed() -> u64 {
    RANDOM_SEED
}

impl SamplerConfig {
    /// All sampler settings as constructor kwargs for the splitter.
    pub fn kwargs(&self) -> Kwargs {
        let mut kwargs = self.extra.clone();
        kwargs.insert("train_ratio".into(), self.train_ratio.into());
        kwargs.insert("val_ratio".into(), self.val_ratio.into());
        kwargs.insert("test_ratio".into(), self.test_ratio.into());
        // toml integers are i64; seeds above that range are rejected by the parser anyway
        kwargs.insert("seed".into(), toml::Value::Integer(self.seed as i64));
        kwargs
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    /// Registry identifier of the artifact logger.
    pub logger: String,
    #[serde(flatten)]
    pub extra: Kwargs,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Registry identifier of the model method.
    pub method: String,
    #[serde(default)]
    pub params: Kwargs,
    #[serde(default)]
    pub validator: Option<String>,
    #[serde(default)]
    pub validator_params: Kwargs,
}

/// The root tables of one experiment TOML.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExperimentConfig {
    pub general: GeneralConfig,
    pub formatter: FormatterConfig,
    pub sampler: SamplerConfig,
    pub evaluator: EvaluatorConfig,
    pub model: ModelConfig,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parses experiment TOML into the per-stage value objects.
pub struct ConfigParser {
    config: ExperimentConfig,
}

impl ConfigParser {
    pub fn from_str(text: &str) -> Result<Self> {
        let config: ExperimentConfig = toml::from_str(text)?;
        Ok(Self { config })
    }

    /// Read and parse a TOML file; the handle is dropped before returning.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            PipelineError::config(format!("cannot read config '{}': {e}", path.display()))
        })?;
        debug!("parsing experiment config {}", path.display());
        Self::from_str(&text)
    }

    pub fn general(&self) -> &GeneralConfig {
        &self.config.general
    }

    pub fn formatter(&self) -> &FormatterConfig {
        &self.config.formatter
    }

    pub fn sampler(&self) -> &SamplerConfig {
        &self.config.sampler
    }

    pub fn evaluator(&self) -> &EvaluatorConfig {
        &self.config.evaluator
    }

    pub fn model(&self) -> &ModelConfig {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub const SAMPLE: &str = r#"
[general]
varieties = ["V1", "V2"]
treatments = ["T1"]
dates = ["2023_06_01", "2023_06_15"]

[formatter]
formatter = "RegressionFormatter"
regression_label = "yield"

[formatter.measurements_paths]
yield = ["Pridelek", "data/measurements/yield.csv"]

[sampler]
splitter = "StratifyAllSplitter"
train_ratio = 0.6
val_ratio = 0.2
test_ratio = 0.2
seed = 7
stratify = ["treatments"]

[evaluator]
logger = "ArtifactLoggerRegression"

[model]
method = "DummyRegressor"
"#;

    #[test]
    fn parses_all_sections() {
        let parser = ConfigParser::from_str(SAMPLE).unwrap();
        assert!(parser.general().varieties.contains("V2"));
        assert_eq!(parser.formatter().regression_label.as_deref(), Some("yield"));
        let (column, path) = &parser.formatter().measurements_paths["yield"];
        assert_eq!(column, "Pridelek");
        assert_eq!(path, &PathBuf::from("data/measurements/yield.csv"));
        assert_eq!(parser.sampler().seed, 7);
        assert_eq!(parser.model().method, "DummyRegressor");
    }

    #[test]
    fn sampler_kwargs_include_extras() {
        let parser = ConfigParser::from_str(SAMPLE).unwrap();
        let kwargs = parser.sampler().kwargs();
        assert_eq!(kwargs["seed"].as_integer(), Some(7));
        assert_eq!(kwargs["train_ratio"].as_float(), Some(0.6));
        assert!(kwargs["stratify"].is_array());
    }

    #[test]
    fn seed_defaults_when_missing() {
        let text = SAMPLE.replace("seed = 7\n", "");
        let parser = ConfigParser::from_str(&text).unwrap();
        assert_eq!(parser.sampler().seed, RANDOM_SEED);
    }

    #[test]
    fn missing_section_is_a_configuration_error() {
        let err = ConfigParser::from_str("[general]\nvarieties=[]\n").err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn settings_resolve_toml_path() {
        let settings = Settings::new("/srv/agro");
        assert_eq!(
            settings.toml_path(),
            PathBuf::from("/srv/agro/configs/specific/clf/_base.toml")
        );
        assert_eq!(settings.save_dir, PathBuf::from("/srv/agro/saved"));
    }
}
