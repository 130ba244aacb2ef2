// src/messaging/stdio.rs
//! JSON-lines transport adapter for the host binary.
//!
//! Upstream daemons write one tagged ingress message per line on stdin; the
//! plan and MPC telemetry leave as JSON lines on stdout. Malformed input is
//! logged and dropped, never fatal: the planner keeps ticking on watchdogs.

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::msgs::{Ingress, MpcTelemetry, PlanMsg};
use super::{InputSenders, PlanSink};

/// Decode stdin lines into ingress messages until EOF.
pub async fn run_stdin_ingress(senders: InputSenders) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut malformed: u64 = 0;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Ingress>(line) {
                    Ok(msg) => {
                        tracing::trace!(channel = ?msg.channel_id(), "ingress message");
                        senders.dispatch(msg);
                    }
                    Err(e) => {
                        malformed += 1;
                        tracing::warn!(total = malformed, "dropping malformed ingress line: {}", e);
                    }
                }
            }
            Ok(None) => {
                tracing::info!("ingress stream closed");
                break;
            }
            Err(e) => {
                tracing::warn!("ingress read error: {}", e);
                break;
            }
        }
    }
}

/// Sink that prints egress messages as JSON lines on stdout.
pub struct StdoutSink;

#[derive(serde::Serialize)]
#[serde(tag = "channel", rename_all = "camelCase")]
enum Egress<'a> {
    Plan(&'a PlanMsg),
    LiveLongitudinalMpc(&'a MpcTelemetry),
}

fn emit(msg: &Egress<'_>) {
    match serde_json::to_string(msg) {
        Ok(line) => println!("{}", line),
        Err(e) => tracing::warn!("failed to encode egress message: {}", e),
    }
}

#[async_trait]
impl PlanSink for StdoutSink {
    async fn publish_plan(&self, plan: &PlanMsg) {
        emit(&Egress::Plan(plan));
    }

    async fn publish_mpc_telemetry(&self, telemetry: &MpcTelemetry) {
        emit(&Egress::LiveLongitudinalMpc(telemetry));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn egress_lines_carry_channel_tags() {
        let plan = PlanMsg::default();
        let line = serde_json::to_string(&Egress::Plan(&plan)).unwrap();
        assert!(line.starts_with("{\"channel\":\"plan\""));
    }
}
