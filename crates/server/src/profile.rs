//! Node definitions and parameter help published to the hub at startup.

use serde_json::{json, Value};
use spabridge_core::{ControllerCommand, DriverTable, SpaCommand};

use crate::node::NODE_DEF_ID;

pub const CONTROLLER_DEF_ID: &str = "controller";

pub const PARAMS_DOC: &str = "\
# Balboa spa bridge

Set `host` to the IP address or host name of the spa's WiFi module
(BWA, TCP port 4257). The spa node is created once a host is set and
is retargeted when the host changes.
";

fn drivers(table: &DriverTable) -> Vec<Value> {
    table
        .iter()
        .map(|s| json!({ "driver": s.driver.as_str(), "uom": s.uom, "init": s.value }))
        .collect()
}

/// Driver and command layout for every node the bridge can create.
pub fn node_definitions() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "nodedefs": [
            {
                "id": CONTROLLER_DEF_ID,
                "drivers": drivers(&DriverTable::controller()),
                "accepts": ControllerCommand::NAMES,
                "sends": ["DON", "DOF"],
            },
            {
                "id": NODE_DEF_ID,
                "drivers": drivers(&DriverTable::spa()),
                "accepts": SpaCommand::NAMES,
                "sends": [],
            },
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_both_node_definitions() {
        let profile = node_definitions();
        let defs = profile["nodedefs"].as_array().unwrap();
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[0]["id"], "controller");
        assert_eq!(defs[0]["drivers"][0], json!({"driver": "ST", "uom": 2, "init": 1.0}));
        assert_eq!(defs[1]["id"], "spa");
        assert_eq!(defs[1]["drivers"].as_array().unwrap().len(), 7);
        assert!(defs[1]["accepts"].as_array().unwrap().contains(&json!("SET_CIRP")));
    }
}
