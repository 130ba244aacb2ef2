// src/messaging/mod.rs

// --- Submodules ---
pub mod msgs;
pub mod stdio;

use async_trait::async_trait;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use msgs::{
    CarStateMsg, GpsPlanMsg, Ingress, LatControlMsg, MapDataMsg, ModelMsg, MpcTelemetry, PlanMsg,
    RadarStateMsg,
};

/// Planner input endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelId {
    CarState,
    Model,
    Live20,
    LiveMapData,
    LatControl,
    GpsPlannerPlan,
}

impl Ingress {
    pub fn channel_id(&self) -> ChannelId {
        match self {
            Ingress::CarState(_) => ChannelId::CarState,
            Ingress::Model(_) => ChannelId::Model,
            Ingress::Live20(_) => ChannelId::Live20,
            Ingress::LiveMapData(_) => ChannelId::LiveMapData,
            Ingress::LatControl(_) => ChannelId::LatControl,
            Ingress::GpsPlannerPlan(_) => ChannelId::GpsPlannerPlan,
        }
    }
}

/// Producer half of the input channels, handed to the transport adapter.
#[derive(Clone)]
pub struct InputSenders {
    pub car_state: UnboundedSender<CarStateMsg>,
    pub model: UnboundedSender<ModelMsg>,
    pub live20: UnboundedSender<RadarStateMsg>,
    pub live_map_data: UnboundedSender<MapDataMsg>,
    pub lat_control: UnboundedSender<LatControlMsg>,
    /// Absent unless the GPS planner endpoint is enabled.
    pub gps_planner_plan: Option<UnboundedSender<GpsPlanMsg>>,
}

impl InputSenders {
    /// Route a decoded ingress message to its channel. Messages for a
    /// disabled endpoint are dropped.
    pub fn dispatch(&self, msg: Ingress) {
        match msg {
            Ingress::CarState(m) => {
                let _ = self.car_state.send(m);
            }
            Ingress::Model(m) => {
                let _ = self.model.send(m);
            }
            Ingress::Live20(m) => {
                let _ = self.live20.send(m);
            }
            Ingress::LiveMapData(m) => {
                let _ = self.live_map_data.send(m);
            }
            Ingress::LatControl(m) => {
                let _ = self.lat_control.send(m);
            }
            Ingress::GpsPlannerPlan(m) => {
                if let Some(tx) = &self.gps_planner_plan {
                    let _ = tx.send(m);
                }
            }
        }
    }
}

/// Consumer half: one receiver per endpoint, drained with "latest wins"
/// semantics once per tick.
pub struct InputMux {
    car_state: UnboundedReceiver<CarStateMsg>,
    model: UnboundedReceiver<ModelMsg>,
    live20: UnboundedReceiver<RadarStateMsg>,
    live_map_data: UnboundedReceiver<MapDataMsg>,
    lat_control: UnboundedReceiver<LatControlMsg>,
    gps_planner_plan: Option<UnboundedReceiver<GpsPlanMsg>>,
}

/// Whatever arrived since the previous tick, conflated per channel.
#[derive(Debug, Default, Clone)]
pub struct TickInputs {
    pub car_state: Option<CarStateMsg>,
    pub model: Option<ModelMsg>,
    pub live20: Option<RadarStateMsg>,
    pub live_map_data: Option<MapDataMsg>,
    pub lat_control: Option<LatControlMsg>,
    pub gps_planner_plan: Option<GpsPlanMsg>,
}

fn drain_latest<T>(rx: &mut UnboundedReceiver<T>) -> Option<T> {
    let mut latest = None;
    while let Ok(msg) = rx.try_recv() {
        latest = Some(msg);
    }
    latest
}

impl InputMux {
    /// Non-blocking poll of every endpoint, keeping only the newest message
    /// on each.
    pub fn poll(&mut self) -> TickInputs {
        TickInputs {
            car_state: drain_latest(&mut self.car_state),
            model: drain_latest(&mut self.model),
            live20: drain_latest(&mut self.live20),
            live_map_data: drain_latest(&mut self.live_map_data),
            lat_control: drain_latest(&mut self.lat_control),
            gps_planner_plan: self.gps_planner_plan.as_mut().and_then(drain_latest),
        }
    }
}

/// Build the channel pair. `gps_enabled` gates the optional GPS planner
/// endpoint.
pub fn input_channels(gps_enabled: bool) -> (InputSenders, InputMux) {
    let (car_tx, car_rx) = mpsc::unbounded_channel();
    let (model_tx, model_rx) = mpsc::unbounded_channel();
    let (live20_tx, live20_rx) = mpsc::unbounded_channel();
    let (map_tx, map_rx) = mpsc::unbounded_channel();
    let (lat_tx, lat_rx) = mpsc::unbounded_channel();
    let (gps_tx, gps_rx) = if gps_enabled {
        let (tx, rx) = mpsc::unbounded_channel();
        (Some(tx), Some(rx))
    } else {
        (None, None)
    };

    (
        InputSenders {
            car_state: car_tx,
            model: model_tx,
            live20: live20_tx,
            live_map_data: map_tx,
            lat_control: lat_tx,
            gps_planner_plan: gps_tx,
        },
        InputMux {
            car_state: car_rx,
            model: model_rx,
            live20: live20_rx,
            live_map_data: map_rx,
            lat_control: lat_rx,
            gps_planner_plan: gps_rx,
        },
    )
}

/// Egress seam: the planner publishes through this without knowing the
/// transport.
#[async_trait]
pub trait PlanSink: Send + Sync {
    async fn publish_plan(&self, plan: &PlanMsg);
    async fn publish_mpc_telemetry(&self, telemetry: &MpcTelemetry);
}

/// Channel-backed sink for tests and the sim harness.
pub struct ChannelSink {
    pub plans: UnboundedSender<PlanMsg>,
    pub telemetry: UnboundedSender<MpcTelemetry>,
}

#[async_trait]
impl PlanSink for ChannelSink {
    async fn publish_plan(&self, plan: &PlanMsg) {
        let _ = self.plans.send(plan.clone());
    }

    async fn publish_mpc_telemetry(&self, telemetry: &MpcTelemetry) {
        let _ = self.telemetry.send(telemetry.clone());
    }
}
