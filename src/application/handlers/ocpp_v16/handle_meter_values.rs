//! MeterValues handler
//!
//! Only the measurands the load manager uses are forwarded; readings are
//! truncated to whole amps, watts and watt-hours.

use rust_ocpp::v1_6::messages::meter_values::{MeterValuesRequest, MeterValuesResponse};
use rust_ocpp::v1_6::types::{Measurand, SampledValue, UnitOfMeasure};
use serde_json::Value;
use tracing::{debug, warn};

use super::{parse_request, to_payload, ActionResult};
use crate::application::dlm::MeterReading;
use crate::application::OcppHandlerV16;
use crate::domain::Phase;

pub async fn handle_meter_values(handler: &OcppHandlerV16, payload: &Value) -> ActionResult {
    let req: MeterValuesRequest = parse_request(handler, "MeterValues", payload)?;

    let readings = readings_from(&req);
    debug!(
        charge_point_id = handler.charge_point_id.as_str(),
        connector_id = req.connector_id,
        transaction_id = ?req.transaction_id,
        readings = readings.len(),
        "MeterValues"
    );

    if !readings.is_empty() {
        if let Err(e) = handler.dlm.meter_values(&handler.charge_point_id, readings).await {
            warn!(charge_point_id = handler.charge_point_id.as_str(), error = %e, "Meter values not delivered");
        }
    }

    to_payload(&MeterValuesResponse {})
}

/// Decode every sampled value we understand, in order.
pub fn readings_from(req: &MeterValuesRequest) -> Vec<MeterReading> {
    req.meter_value
        .iter()
        .flat_map(|mv| mv.sampled_value.iter())
        .filter_map(reading_from)
        .collect()
}

fn reading_from(sampled: &SampledValue) -> Option<MeterReading> {
    let value: f64 = sampled.value.trim().parse().ok()?;
    let phase = sampled.phase.as_ref().and_then(|p| phase_of(&format!("{:?}", p)));
    // OCPP default measurand
    let measurand = sampled
        .measurand
        .clone()
        .unwrap_or(Measurand::EnergyActiveImportRegister);

    match measurand {
        Measurand::CurrentImport => phase.map(|p| MeterReading::CurrentImport(p, whole(value))),
        Measurand::CurrentOffered => Some(MeterReading::CurrentOffered(whole(value))),
        Measurand::PowerActiveImport => {
            let watts = match sampled.unit {
                Some(UnitOfMeasure::Kw) => value * 1000.0,
                _ => value,
            };
            Some(MeterReading::PowerImport(phase, whole(watts)))
        }
        Measurand::EnergyActiveImportRegister => {
            let wh = match sampled.unit {
                Some(UnitOfMeasure::KWh) => value * 1000.0,
                _ => value,
            };
            Some(MeterReading::EnergyImportRegister(wh as i64))
        }
        _ => None,
    }
}

/// Line-to-neutral or bare line phases; line-to-line readings are ignored.
fn phase_of(name: &str) -> Option<Phase> {
    match name {
        "L1" | "L1N" => Some(Phase::L1),
        "L2" | "L2N" => Some(Phase::L2),
        "L3" | "L3N" => Some(Phase::L3),
        _ => None,
    }
}

fn whole(value: f64) -> u32 {
    // `as` saturates: negatives become 0
    value as u32
}
