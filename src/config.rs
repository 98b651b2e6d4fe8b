use crate::connection::{Half, ModuleId};
use crate::feasibility::FeasibilityParams;
use crate::solver::LocalSolveParams;
use serde::{Deserialize, Serialize};

/// Connector site names carried by each module half.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteCatalog {
    pub a: Vec<String>,
    pub b: Vec<String>,
}

impl SiteCatalog {
    pub fn sites(&self, half: Half) -> &[String] {
        match half {
            Half::A => &self.a,
            Half::B => &self.b,
        }
    }
}

impl Default for SiteCatalog {
    fn default() -> Self {
        Self {
            a: vec!["right".to_string(), "bottom".to_string()],
            b: vec!["left".to_string(), "top".to_string()],
        }
    }
}

/// Configuration for the event applier and attach planner.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconfigConfig {
    /// Module the kinematic tree is compiled from.
    pub root_module: ModuleId,

    /// Precheck tolerances.
    pub feasibility: FeasibilityParams,

    /// Postcheck tolerances. `None` reuses `feasibility`.
    pub postcheck: Option<FeasibilityParams>,

    /// Iteration settings for the local solver.
    pub local_solve: LocalSolveParams,

    /// Retry near-miss attaches through the local solver.
    pub enable_local_solve: bool,

    pub sites: SiteCatalog,
}

impl Default for ReconfigConfig {
    fn default() -> Self {
        Self {
            root_module: 1,
            feasibility: FeasibilityParams::default(),
            postcheck: None,
            local_solve: LocalSolveParams::default(),
            enable_local_solve: false,
            sites: SiteCatalog::default(),
        }
    }
}

impl ReconfigConfig {
    pub fn postcheck_params(&self) -> FeasibilityParams {
        self.postcheck.unwrap_or(self.feasibility)
    }

    /// Solver settings whose tolerances match the precheck, so a solved pair
    /// passes the re-check.
    pub fn solver_params(&self) -> LocalSolveParams {
        LocalSolveParams {
            pos_tol: self.feasibility.pos_tol,
            z_dot_max: self.feasibility.z_dot_max,
            yaw_tol_deg: self.feasibility.yaw_tol_deg,
            ..self.local_solve
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_fills_defaults() {
        let config: ReconfigConfig =
            serde_json::from_str(r#"{ "root_module": 4, "feasibility": { "pos_tol": 0.05 } }"#).unwrap();
        assert_eq!(config.root_module, 4);
        assert_eq!(config.feasibility.pos_tol, 0.05);
        assert_eq!(config.feasibility.yaw_tol_deg, 2.0);
        assert_eq!(config.postcheck_params(), config.feasibility);
        assert_eq!(config.sites, SiteCatalog::default());
        assert!(!config.enable_local_solve);
    }

    #[test]
    fn solver_params_follow_precheck_tolerances() {
        let config = ReconfigConfig {
            feasibility: FeasibilityParams {
                pos_tol: 0.01,
                z_dot_max: -0.99,
                yaw_tol_deg: 4.0,
            },
            local_solve: LocalSolveParams {
                max_iters: 25,
                ..Default::default()
            },
            ..Default::default()
        };
        let p = config.solver_params();
        assert_eq!(p.pos_tol, 0.01);
        assert_eq!(p.z_dot_max, -0.99);
        assert_eq!(p.yaw_tol_deg, 4.0);
        assert_eq!(p.max_iters, 25);
    }

    #[test]
    fn catalog_lists_sites_per_half() {
        let catalog = SiteCatalog::default();
        assert_eq!(catalog.sites(Half::A), ["right", "bottom"]);
        assert_eq!(catalog.sites(Half::B), ["left", "top"]);
    }
}
