use crate::continuation::{ContinuationDriver, HomotopySettings};
use crate::direct::{DirectSettings, DirectSolver};
use crate::error::IcError;
use crate::homotopy::HomotopyKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// How consistent initial conditions are computed.
///
/// In TOML the variant is selected by `method`, and the remaining keys are
/// the chosen settings:
///
/// ```toml
/// method = "homotopy"
/// type = "affine"
/// driver = "predictor_corrector"
/// num_steps = 50
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum IcConfig {
    #[serde(alias = "root")]
    Direct(DirectSettings),
    Homotopy(HomotopySettings),
}

impl Default for IcConfig {
    fn default() -> Self {
        IcConfig::Direct(DirectSettings::default())
    }
}

const METHODS: [&str; 3] = ["direct", "root", "homotopy"];

impl IcConfig {
    /// Default settings for a method name (`direct`, `root`, `homotopy`).
    pub fn named(method: &str) -> Result<Self> {
        match method {
            "direct" | "root" => Ok(IcConfig::Direct(DirectSettings::default())),
            "homotopy" => Ok(IcConfig::Homotopy(HomotopySettings::default())),
            other => Err(IcError::UnsupportedMethod(other.to_string()).into()),
        }
    }

    /// Parses a TOML document. Unknown method, homotopy, driver, or solver
    /// names are reported as the matching [`IcError`].
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let table: toml::Table = toml::from_str(source).context("invalid TOML in IC config")?;

        let method = table
            .get("method")
            .and_then(toml::Value::as_str)
            .unwrap_or("direct");
        if !METHODS.contains(&method) {
            return Err(IcError::UnsupportedMethod(method.to_string()).into());
        }
        if let Some(kind) = table.get("type").and_then(toml::Value::as_str) {
            kind.parse::<HomotopyKind>()?;
        }
        if let Some(driver) = table.get("driver").and_then(toml::Value::as_str) {
            driver.parse::<ContinuationDriver>()?;
        }
        if let Some(solver) = table.get("solver").and_then(toml::Value::as_str) {
            solver.parse::<DirectSolver>()?;
        }

        let mut table = table;
        if !table.contains_key("method") {
            table.insert("method".to_string(), toml::Value::String("direct".into()));
        }
        let config: IcConfig = toml::Value::Table(table)
            .try_into()
            .context("invalid IC config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            IcConfig::Direct(settings) => settings.validate(),
            IcConfig::Homotopy(settings) => settings.validate(),
        }
    }

    /// Residual tolerance of the selected solver.
    pub fn tolerance(&self) -> f64 {
        match self {
            IcConfig::Direct(settings) => settings.tolerance,
            IcConfig::Homotopy(settings) => settings.newton.tolerance,
        }
    }

    pub fn method_name(&self) -> &'static str {
        match self {
            IcConfig::Direct(_) => "direct",
            IcConfig::Homotopy(_) => "homotopy",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ic_error(result: Result<IcConfig>) -> IcError {
        result
            .unwrap_err()
            .downcast_ref::<IcError>()
            .cloned()
            .expect("expected an IcError")
    }

    #[test]
    fn homotopy_config_from_toml() {
        let config = IcConfig::from_toml_str(
            r#"
            method = "homotopy"
            type = "affine"
            driver = "predictor_corrector"
            num_steps = 50
            tolerance = 1e-8
            "#,
        )
        .unwrap();

        let IcConfig::Homotopy(settings) = config else {
            panic!("expected homotopy config, got {config:?}");
        };
        assert_eq!(settings.kind, HomotopyKind::Affine);
        assert_eq!(settings.driver, ContinuationDriver::PredictorCorrector);
        assert_eq!(settings.num_steps, 50);
        assert_eq!(settings.ds, 0.1);
        assert_eq!(settings.newton.tolerance, 1e-8);
        assert_eq!(settings.newton.max_iter, 100);
    }

    #[test]
    fn root_is_an_alias_for_direct() {
        let config = IcConfig::from_toml_str("method = \"root\"\nmax_iter = 50").unwrap();
        assert_eq!(
            config,
            IcConfig::Direct(DirectSettings {
                max_iter: 50,
                ..DirectSettings::default()
            })
        );
        assert_eq!(IcConfig::from_toml_str("").unwrap(), IcConfig::default());
    }

    #[test]
    fn unknown_names_map_to_typed_errors() {
        assert_eq!(
            ic_error(IcConfig::from_toml_str("method = \"shooting\"")),
            IcError::UnsupportedMethod("shooting".into())
        );
        assert_eq!(
            ic_error(IcConfig::from_toml_str(
                "method = \"homotopy\"\ntype = \"convex\""
            )),
            IcError::UnsupportedHomotopy("convex".into())
        );
        assert_eq!(
            ic_error(IcConfig::from_toml_str(
                "method = \"homotopy\"\ndriver = \"euler\""
            )),
            IcError::UnsupportedDriver("euler".into())
        );
        assert_eq!(
            ic_error(IcConfig::from_toml_str("solver = \"hybr\"")),
            IcError::UnsupportedSolver("hybr".into())
        );
        assert_eq!(
            ic_error(IcConfig::named("collocation")),
            IcError::UnsupportedMethod("collocation".into())
        );
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            ic_error(IcConfig::from_toml_str("method = \"homotopy\"\nds = -0.5")),
            IcError::InvalidSettings(_)
        ));
    }

    #[test]
    fn named_defaults() {
        assert_eq!(
            IcConfig::named("homotopy").unwrap(),
            IcConfig::Homotopy(HomotopySettings::default())
        );
        assert_eq!(IcConfig::named("root").unwrap().method_name(), "direct");
        assert_eq!(IcConfig::default().tolerance(), 1e-10);
    }
}
