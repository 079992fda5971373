//! Generation cost table.

use serde::{Deserialize, Serialize};

use crate::FluxModel;

/// Credits charged for a `pro` generation.
pub const PRO_GENERATION_CREDITS: i64 = 80;

/// Credits charged for a `schnell` generation.
pub const SCHNELL_GENERATION_CREDITS: i64 = 15;

/// Credits required per generation, by model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostTable {
    /// Credits per `pro` generation.
    pub pro: i64,
    /// Credits per `schnell` generation.
    pub schnell: i64,
}

impl Default for CostTable {
    fn default() -> Self {
        Self {
            pro: PRO_GENERATION_CREDITS,
            schnell: SCHNELL_GENERATION_CREDITS,
        }
    }
}

impl CostTable {
    /// Credits required to generate with `model`.
    #[must_use]
    pub const fn credits_for(&self, model: FluxModel) -> i64 {
        match model {
            FluxModel::Pro => self.pro,
            FluxModel::Schnell => self.schnell,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_costs() {
        let table = CostTable::default();
        assert_eq!(table.credits_for(FluxModel::Pro), 80);
        assert_eq!(table.credits_for(FluxModel::Schnell), 15);
    }

    #[test]
    fn table_loads_from_json() {
        let table: CostTable = serde_json::from_str(r#"{"pro": 100, "schnell": 20}"#).unwrap();
        assert_eq!(table.credits_for(FluxModel::Pro), 100);
    }
}
