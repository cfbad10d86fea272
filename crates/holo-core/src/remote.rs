//! Remote-control command surface.
//!
//! Routes mirror the optimiser's HTTP endpoints (`/optimiser/start`,
//! `/optimiser/refzone/3`, ...). Transport is left to the caller: a route
//! string goes in, a [`RemoteResponse`] with a status code and a JSON or PNG
//! body comes out.
//!
//! | Route | Effect |
//! |-------|--------|
//! | `/optimiser/start` | start, or wake the running optimiser |
//! | `/optimiser/nextStep` | wake for one more frame |
//! | `/optimiser/stop` | stop the current run |
//! | `/optimiser/refzone[/<id>]` | get status / set reference zone |
//! | `/optimiser/probzone[/<id>]` | get status / set probe zone |
//! | `/optimiser/phase[/<v>]` | get status / set phase |
//! | `/optimiser/phaseStep/<v>` | set phase step |
//! | `/optimiser/IDsList` | distinct zone identifiers |
//! | `/optimiser/phasePattern` | current frame as 8-bit PNG |
//! | `/optimiser/phasePatternData` | current frame as a JSON matrix |

use std::sync::Arc;

use log::debug;
use serde_json::{json, Value};
use thiserror::Error;

use crate::hologram::{encode_png, normalize};
use crate::optimizer::{OptimizerError, WavefrontOptimizer};
use crate::types::ZoneId;

const PREFIX: &str = "/optimiser";

/// A parsed control route.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Start,
    NextStep,
    Stop,
    Status,
    SetReferenceZone(ZoneId),
    SetProbeZone(ZoneId),
    SetPhase(f64),
    SetPhaseStep(f64),
    IdsList,
    PhasePattern,
    PhasePatternData,
}

/// Errors raised while parsing a route.
#[derive(Debug, Error, PartialEq)]
pub enum RouteError {
    #[error("Unknown route '{0}'")]
    UnknownRoute(String),

    #[error("Invalid value '{value}' for {what}")]
    InvalidValue { what: &'static str, value: String },
}

impl Command {
    pub fn parse(route: &str) -> Result<Self, RouteError> {
        let route = route.trim();
        let path = route.split('?').next().unwrap_or(route);
        let rest = path
            .strip_prefix(PREFIX)
            .ok_or_else(|| RouteError::UnknownRoute(route.to_string()))?;
        let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

        let command = match segments.as_slice() {
            ["start"] => Self::Start,
            ["nextStep"] => Self::NextStep,
            ["stop"] => Self::Stop,
            ["refzone"] | ["probzone"] | ["phase"] => Self::Status,
            ["refzone", id] => Self::SetReferenceZone(parse_value(id, "reference zone")?),
            ["probzone", id] => Self::SetProbeZone(parse_value(id, "probe zone")?),
            ["phase", v] => Self::SetPhase(parse_value(v, "phase")?),
            ["phaseStep", v] => Self::SetPhaseStep(parse_value(v, "phase step")?),
            ["IDsList"] => Self::IdsList,
            ["phasePattern"] => Self::PhasePattern,
            ["phasePatternData"] => Self::PhasePatternData,
            _ => return Err(RouteError::UnknownRoute(route.to_string())),
        };
        Ok(command)
    }
}

fn parse_value<T: std::str::FromStr>(raw: &str, what: &'static str) -> Result<T, RouteError> {
    raw.parse().map_err(|_| RouteError::InvalidValue {
        what,
        value: raw.to_string(),
    })
}

/// Response body.
#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Value),
    Png(Vec<u8>),
}

/// Status code plus body, ready for any transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: Body,
}

impl RemoteResponse {
    fn ok(value: Value) -> Self {
        Self {
            status: 200,
            body: Body::Json(value),
        }
    }

    fn error(status: u16, message: impl ToString) -> Self {
        Self {
            status,
            body: Body::Json(json!({ "error": message.to_string() })),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }

    /// The JSON body, if this is a JSON response.
    pub fn json(&self) -> Option<&Value> {
        match &self.body {
            Body::Json(v) => Some(v),
            Body::Png(_) => None,
        }
    }
}

impl From<OptimizerError> for RemoteResponse {
    fn from(err: OptimizerError) -> Self {
        let status = if err.is_validation() { 400 } else { 500 };
        Self::error(status, err)
    }
}

/// Dispatches control routes to a shared optimiser.
#[derive(Clone)]
pub struct RemoteControl {
    optimizer: Arc<WavefrontOptimizer>,
}

impl RemoteControl {
    pub fn new(optimizer: Arc<WavefrontOptimizer>) -> Self {
        Self { optimizer }
    }

    pub fn optimizer(&self) -> &Arc<WavefrontOptimizer> {
        &self.optimizer
    }

    /// Parse and execute a route.
    pub fn handle(&self, route: &str) -> RemoteResponse {
        debug!("Remote request {}", route);
        match Command::parse(route) {
            Ok(command) => self.execute(command),
            Err(e @ RouteError::UnknownRoute(_)) => RemoteResponse::error(404, e),
            Err(e) => RemoteResponse::error(400, e),
        }
    }

    pub fn execute(&self, command: Command) -> RemoteResponse {
        match self.try_execute(command) {
            Ok(response) => response,
            Err(e) => e.into(),
        }
    }

    fn try_execute(&self, command: Command) -> Result<RemoteResponse, OptimizerError> {
        let opt = &self.optimizer;
        let to_json = |report| serde_json::to_value(report).unwrap_or(Value::Null);

        let response = match command {
            Command::Start => RemoteResponse::ok(to_json(opt.start()?)),
            Command::NextStep => RemoteResponse::ok(to_json(opt.next_step())),
            Command::Stop => {
                opt.stop();
                RemoteResponse::ok(to_json(opt.report()))
            }
            Command::Status => RemoteResponse::ok(
                serde_json::to_value(opt.status()).unwrap_or(Value::Null),
            ),
            Command::SetReferenceZone(id) => {
                RemoteResponse::ok(to_json(opt.set_reference_zone(id)?))
            }
            Command::SetProbeZone(id) => RemoteResponse::ok(to_json(opt.set_probe_zone(id)?)),
            Command::SetPhase(v) => RemoteResponse::ok(to_json(opt.set_phase(v)?)),
            Command::SetPhaseStep(v) => {
                let mut body = to_json(opt.set_phase_step(v)?);
                if let Value::Object(map) = &mut body {
                    map.insert("PhaseStep".into(), json!(opt.phase_step()));
                }
                RemoteResponse::ok(body)
            }
            Command::IdsList => RemoteResponse::ok(json!({ "IDsList": opt.ids_list()? })),
            Command::PhasePattern => match opt.phase_pattern() {
                None => RemoteResponse::error(404, "No pattern defined"),
                Some(pattern) => {
                    let frame = normalize(&pattern, opt.settings().phase_correction);
                    match encode_png(&frame) {
                        Ok(png) => RemoteResponse {
                            status: 200,
                            body: Body::Png(png),
                        },
                        Err(e) => RemoteResponse::error(500, e),
                    }
                }
            },
            Command::PhasePatternData => match opt.phase_pattern() {
                None => RemoteResponse::error(404, "No pattern defined"),
                Some(pattern) => {
                    let rows: Vec<Vec<f64>> = pattern.rows().into_iter().map(|r| r.to_vec()).collect();
                    RemoteResponse::ok(json!({ "PhasePattern": rows }))
                }
            },
        };
        Ok(response)
    }
}
