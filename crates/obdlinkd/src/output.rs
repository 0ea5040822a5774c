//! Telemetry printout

use obd_core::TelemetryEvent;

/// Render one event as a line of text or JSON
pub fn format_event(event: &TelemetryEvent, json: bool) -> String {
    if json {
        return serde_json::to_string(event).unwrap_or_else(|e| format!("{{\"error\":\"{}\"}}", e));
    }

    match event {
        TelemetryEvent::Metric {
            kind, value, unit, ..
        } => format!("{:<14} {:>6} {}", kind.id(), value, unit),
        TelemetryEvent::ConnectionStatus { connected, .. } => {
            if *connected {
                "adapter        connected".to_string()
            } else {
                "adapter        disconnected".to_string()
            }
        }
        TelemetryEvent::LinkError { present, .. } => {
            if *present {
                "adapter        error reported".to_string()
            } else {
                "adapter        error cleared".to_string()
            }
        }
    }
}
