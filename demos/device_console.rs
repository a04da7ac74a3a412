//! Device console example
//!
//! Connects to a device-control service, prints pushed status updates and
//! connection changes, and polls the device list as a fallback while push
//! delivery looks unreliable.
//!
//! Run with: cargo run --example device_console -- ws://192.168.1.20:8080/rpc
//!
//! An optional second argument is a JSON config file (see `ClientConfig`).

use devlink::{ClientBuilder, ClientConfig, ConnectionEvent, ObservabilityConfig};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct Device {
    id: u32,
    #[serde(default)]
    name: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let address = args
        .next()
        .unwrap_or_else(|| "ws://127.0.0.1:8080/rpc".to_string());
    let config = match args.next() {
        Some(path) => ClientConfig::from_json(&std::fs::read_to_string(path)?)?,
        None => ClientConfig::default(),
    };

    let observability = ObservabilityConfig::new("device-console")
        .with_traces(false)
        .with_metrics(false)
        .with_pretty_logs();

    let manager = ClientBuilder::from_config(config)
        .with_observability(observability)
        .on_resync(|manager| async move {
            let devices: Vec<Device> = manager.call("get_device_list", ()).await?;
            tracing::info!(count = devices.len(), "resynced device list");
            Ok(())
        })
        .build()?;

    let mut events = manager.events();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ConnectionEvent::StateChanged { to, .. } => println!("[link] {}", to),
                ConnectionEvent::ReconnectExhausted { attempts } => {
                    println!("[link] gave up after {} attempts", attempts)
                }
                other => println!("[link] {:?}", other),
            }
        }
    });

    let _status = manager.subscribe("status_update", |params| {
        println!("[status] {}", params);
    });

    manager.connect(address)?;
    manager.wait_until_connected().await?;

    let devices: Vec<Device> = manager.call("get_device_list", ()).await?;
    for device in &devices {
        println!("device {}: {}", device.id, device.name);
    }

    if let Some(first) = devices.first() {
        let reply: Value = manager
            .call_with_timeout(
                "get_parameters",
                json!({ "device": first.id }),
                Duration::from_secs(3),
            )
            .await?;
        println!("parameters of {}: {}", first.id, reply);
    }

    for _ in 0..6 {
        tokio::time::sleep(Duration::from_secs(10)).await;
        let snapshot = manager.state();
        println!(
            "[health] {} score={} quality={}",
            snapshot.status, snapshot.health_score, snapshot.quality
        );
    }

    manager.dispose();
    devlink::core::shutdown_observability();
    Ok(())
}
