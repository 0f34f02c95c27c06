use serde::{Deserialize, Serialize};

// Unit-of-measure codes understood by the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uom(pub u16);

impl Uom {
    pub const BOOLEAN: Uom = Uom(2);
    pub const CELSIUS: Uom = Uom(4);
    pub const INDEX: Uom = Uom(25);
    pub const OFF_ON: Uom = Uom(78);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Driver {
    #[serde(rename = "ST")]
    Status,
    #[serde(rename = "GV1")]
    Pump1,
    #[serde(rename = "GV2")]
    Pump2,
    #[serde(rename = "GV3")]
    CirculationPump,
    #[serde(rename = "GV4")]
    Blower,
    #[serde(rename = "GV5")]
    Light,
    #[serde(rename = "GV6")]
    TargetTemp,
    #[serde(rename = "CLITEMP")]
    CurrentTemp,
}

impl Driver {
    pub fn as_str(&self) -> &'static str {
        match self {
            Driver::Status => "ST",
            Driver::Pump1 => "GV1",
            Driver::Pump2 => "GV2",
            Driver::CirculationPump => "GV3",
            Driver::Blower => "GV4",
            Driver::Light => "GV5",
            Driver::TargetTemp => "GV6",
            Driver::CurrentTemp => "CLITEMP",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriverSlot {
    pub driver: Driver,
    pub value: f64,
    pub uom: Uom,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DriverTable {
    slots: Vec<DriverSlot>,
}

impl DriverTable {
    pub fn declare(slots: &[(Driver, f64, Uom)]) -> Self {
        Self {
            slots: slots
                .iter()
                .map(|&(driver, value, uom)| DriverSlot { driver, value, uom })
                .collect(),
        }
    }

    pub fn spa() -> Self {
        Self::declare(&[
            (Driver::Pump1, 0.0, Uom::INDEX),
            (Driver::Pump2, 0.0, Uom::INDEX),
            (Driver::CirculationPump, 0.0, Uom::OFF_ON),
            (Driver::Blower, 0.0, Uom::OFF_ON),
            (Driver::Light, 0.0, Uom::OFF_ON),
            (Driver::TargetTemp, 0.0, Uom::CELSIUS),
            (Driver::CurrentTemp, 0.0, Uom::CELSIUS),
        ])
    }

    pub fn controller() -> Self {
        Self::declare(&[(Driver::Status, 1.0, Uom::BOOLEAN)])
    }

    pub fn get(&self, driver: Driver) -> Option<f64> {
        self.slot(driver).map(|s| s.value)
    }

    pub fn slot(&self, driver: Driver) -> Option<&DriverSlot> {
        self.slots.iter().find(|s| s.driver == driver)
    }

    /// Overwrite a slot. Returns `Some(true)` when the value changed,
    /// `Some(false)` when it was already equal, `None` for an undeclared driver.
    pub fn set(&mut self, driver: Driver, value: f64) -> Option<bool> {
        let slot = self.slots.iter_mut().find(|s| s.driver == driver)?;
        let changed = slot.value != value;
        slot.value = value;
        Some(changed)
    }

    pub fn iter(&self) -> impl Iterator<Item = &DriverSlot> {
        self.slots.iter()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spa_table_starts_zeroed() {
        let table = DriverTable::spa();
        assert_eq!(table.len(), 7);
        assert!(table.iter().all(|s| s.value == 0.0));
        assert_eq!(table.slot(Driver::Pump1).unwrap().uom, Uom::INDEX);
        assert_eq!(table.slot(Driver::Blower).unwrap().uom, Uom::OFF_ON);
        assert_eq!(table.slot(Driver::CurrentTemp).unwrap().uom, Uom::CELSIUS);
        assert!(table.get(Driver::Status).is_none());
    }

    #[test]
    fn controller_table_reports_running() {
        let table = DriverTable::controller();
        assert_eq!(table.get(Driver::Status), Some(1.0));
        assert_eq!(table.slot(Driver::Status).unwrap().uom, Uom::BOOLEAN);
    }

    #[test]
    fn set_reports_change() {
        let mut table = DriverTable::spa();
        assert_eq!(table.set(Driver::TargetTemp, 100.0), Some(true));
        assert_eq!(table.set(Driver::TargetTemp, 100.0), Some(false));
        assert_eq!(table.get(Driver::TargetTemp), Some(100.0));
        assert_eq!(table.set(Driver::Status, 1.0), None);
    }

    #[test]
    fn driver_names_round_trip_through_serde() {
        let json = serde_json::to_string(&Driver::CurrentTemp).unwrap();
        assert_eq!(json, "\"CLITEMP\"");
        let back: Driver = serde_json::from_str("\"GV3\"").unwrap();
        assert_eq!(back, Driver::CirculationPump);
        assert!(serde_json::from_str::<Driver>("\"GV9\"").is_err());
    }
}
