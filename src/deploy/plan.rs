//! Deployment plan files
//!
//! A plan is a TOML file describing what to deploy where:
//!
//! ```toml
//! environment = "production"
//! image_prefix = "registry.example.com/shop"
//! tag_base = "2024.06"
//!
//! [[groups]]
//! name = "data"
//!
//! [[groups.charts]]
//! name = "orders"
//! chart = "./charts/orders"
//! version = "1.4.2"
//! namespace = "shop"
//! dependencies = ["postgres-primary"]
//! ```
//!
//! Groups deploy in file order; charts within a group deploy in parallel.

use crate::deploy::parallel::validate_group;
use crate::deploy::types::{ChartSpec, DeployOptions};
use crate::error::{ChartpilotError, ChartpilotResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tokio::fs;

/// A full deployment plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployPlan {
    pub environment: String,

    #[serde(default)]
    pub image_prefix: String,

    #[serde(default)]
    pub tag_base: String,

    /// Values applied to every chart
    #[serde(default)]
    pub values: BTreeMap<String, String>,

    /// Deploy command template, defaults to helm
    #[serde(default)]
    pub command: Option<Vec<String>>,

    #[serde(default)]
    pub groups: Vec<GroupPlan>,
}

/// Charts deployed together
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupPlan {
    pub name: String,

    #[serde(default)]
    pub charts: Vec<ChartSpec>,
}

impl DeployPlan {
    /// Read, parse and validate a plan file
    pub async fn load(path: &Path) -> ChartpilotResult<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| ChartpilotError::io(format!("reading plan {}", path.display()), e))?;
        Self::parse(&content, path)
    }

    /// Parse and validate plan contents; `path` is only used in errors
    pub fn parse(content: &str, path: &Path) -> ChartpilotResult<Self> {
        let invalid = |reason: String| ChartpilotError::PlanInvalid {
            path: path.to_path_buf(),
            reason,
        };

        let mut plan: DeployPlan = toml::from_str(content).map_err(|e| invalid(e.to_string()))?;

        if plan.environment.trim().is_empty() {
            return Err(invalid("environment must not be empty".to_string()));
        }
        if plan.groups.is_empty() {
            return Err(invalid("plan has no groups".to_string()));
        }

        let mut group_names = HashSet::new();
        for group in &mut plan.groups {
            if !group_names.insert(group.name.clone()) {
                return Err(invalid(format!("group {} defined twice", group.name)));
            }
            for chart in &mut group.charts {
                if chart.chart.is_empty() {
                    chart.chart = chart.name.clone();
                }
            }
            validate_group(&group.name, &group.charts).map_err(|e| invalid(e.to_string()))?;
        }

        Ok(plan)
    }

    /// Effective deploy options for this plan
    pub fn options(&self, dry_run: bool, force_update: bool) -> DeployOptions {
        DeployOptions {
            environment: self.environment.clone(),
            image_prefix: self.image_prefix.clone(),
            tag_base: self.tag_base.clone(),
            values: self.values.clone(),
            dry_run,
            force_update,
        }
    }

    /// Look up a group by name
    pub fn group(&self, name: &str) -> Option<&GroupPlan> {
        self.groups.iter().find(|g| g.name == name)
    }

    /// Every chart across all groups
    pub fn charts(&self) -> impl Iterator<Item = &ChartSpec> {
        self.groups.iter().flat_map(|g| g.charts.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    const PLAN: &str = r#"
        environment = "production"
        image_prefix = "registry.example.com/shop"
        tag_base = "2024.06"

        [values]
        "global.region" = "eu-west-1"

        [[groups]]
        name = "data"

        [[groups.charts]]
        name = "orders"
        version = "1.4.2"
        namespace = "shop"
        dependencies = ["postgres-primary", "payments-api"]

        [[groups]]
        name = "web"

        [[groups.charts]]
        name = "ui"
        chart = "oci://registry.example.com/charts/ui"
        version = "1.2.0"
        namespace = "web"
    "#;

    fn path() -> PathBuf {
        PathBuf::from("plan.toml")
    }

    #[test]
    fn parses_groups_in_order() {
        let plan = DeployPlan::parse(PLAN, &path()).unwrap();

        let names: Vec<_> = plan.groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["data", "web"]);
        assert_eq!(plan.charts().count(), 2);
    }

    #[test]
    fn chart_reference_defaults_to_name() {
        let plan = DeployPlan::parse(PLAN, &path()).unwrap();
        let orders = &plan.group("data").unwrap().charts[0];

        assert_eq!(orders.chart, "orders");
        assert_eq!(orders.dependencies.len(), 2);
    }

    #[test]
    fn options_carry_plan_settings() {
        let plan = DeployPlan::parse(PLAN, &path()).unwrap();
        let options = plan.options(true, false);

        assert_eq!(options.environment, "production");
        assert_eq!(options.tag_base, "2024.06");
        assert_eq!(options.values.get("global.region").map(String::as_str), Some("eu-west-1"));
        assert!(options.dry_run);
    }

    #[test]
    fn rejects_duplicate_groups() {
        let content = r#"
            environment = "staging"
            [[groups]]
            name = "a"
            [[groups]]
            name = "a"
        "#;
        let err = DeployPlan::parse(content, &path()).unwrap_err();
        assert!(err.to_string().contains("defined twice"));
    }

    #[test]
    fn rejects_invalid_chart_in_later_group() {
        let content = r#"
            environment = "staging"

            [[groups]]
            name = "data"
            [[groups.charts]]
            name = "orders"
            namespace = "shop"

            [[groups]]
            name = "web"
            [[groups.charts]]
            name = "ui"
            namespace = "web"
            [[groups.charts]]
            name = "ui"
            namespace = ""
        "#;
        let err = DeployPlan::parse(content, &path()).unwrap_err();

        assert!(matches!(err, ChartpilotError::PlanInvalid { .. }));
        assert!(err.to_string().contains("group web"));
    }

    #[test]
    fn rejects_plan_without_groups() {
        let err = DeployPlan::parse("environment = \"dev\"", &path()).unwrap_err();
        assert!(matches!(err, ChartpilotError::PlanInvalid { .. }));
    }
}
