// Topic layout shared by the bridge and the hub side.

pub const ROOT: &str = "balboa";

pub const CONTROLLER_ADDRESS: &str = "controller";
pub const SPA_ADDRESS: &str = "spa";

// Node-scoped topics
pub fn driver_topic(address: &str, driver: &str) -> String {
    format!("{}/{}/driver/{}", ROOT, address, driver)
}

pub fn report_topic(address: &str, command: &str) -> String {
    format!("{}/{}/report/{}", ROOT, address, command)
}

pub fn command_topic(address: &str, command: &str) -> String {
    format!("{}/{}/cmd/{}", ROOT, address, command)
}

pub fn node_topic(address: &str) -> String { format!("{}/nodes/{}", ROOT, address) }
pub fn notice_topic(key: &str) -> String { format!("{}/notices/{}", ROOT, key) }

// Bridge-scoped topics
pub fn params_topic() -> String { format!("{}/params", ROOT) }
pub fn params_doc_topic() -> String { format!("{}/params/doc", ROOT) }
pub fn profile_topic() -> String { format!("{}/profile", ROOT) }
pub fn bridge_status_topic() -> String { format!("{}/bridge/status", ROOT) }

// Wildcards
pub fn command_wildcard_all() -> &'static str { "balboa/+/cmd/+" }

/// Split `balboa/{address}/cmd/{command}` into its address and command.
pub fn parse_command_topic(topic: &str) -> Option<(&str, &str)> {
    let mut parts = topic.split('/');
    if parts.next()? != ROOT {
        return None;
    }
    let address = parts.next()?;
    if parts.next()? != "cmd" {
        return None;
    }
    let command = parts.next()?;
    if parts.next().is_some() || address.is_empty() || command.is_empty() {
        return None;
    }
    Some((address, command))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_node_topics() {
        assert_eq!(driver_topic(SPA_ADDRESS, "GV1"), "balboa/spa/driver/GV1");
        assert_eq!(report_topic(CONTROLLER_ADDRESS, "DON"), "balboa/controller/report/DON");
        assert_eq!(notice_topic("host"), "balboa/notices/host");
        assert_eq!(params_topic(), "balboa/params");
    }

    #[test]
    fn parses_command_topics() {
        let topic = command_topic(SPA_ADDRESS, "SET_TEMP");
        assert_eq!(parse_command_topic(&topic), Some(("spa", "SET_TEMP")));
        assert_eq!(
            parse_command_topic("balboa/controller/cmd/DISCOVER"),
            Some(("controller", "DISCOVER"))
        );
        assert_eq!(parse_command_topic("balboa/spa/driver/GV1"), None);
        assert_eq!(parse_command_topic("spa/spa/cmd/SET_TEMP"), None);
        assert_eq!(parse_command_topic("balboa/spa/cmd/SET_TEMP/extra"), None);
        assert_eq!(parse_command_topic("balboa//cmd/QUERY"), None);
    }
}
