use android_tv_remote::RemoteControl;
use android_tv_remote::adb::RemoteResult;
use android_tv_remote::args::{Args, Command};
use android_tv_remote::config::BridgeEndpoint;
use clap::Parser;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let config = args.to_config();
    let remote = RemoteControl::from_config(&config);
    let result = run(&remote, args.command).await;
    remote.shutdown().await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("❌ {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(remote: &RemoteControl, command: Command) -> RemoteResult<()> {
    // Device-addressed commands need a live transport first
    let device_id = match command.device_id() {
        Some(id) => {
            let device = remote.resolve_device(id)?;
            let device = remote.connect(&device).await?;
            println!("📺 Connected to {} ({})", device.name, device.id);
            Some(device.id)
        }
        None => None,
    };
    let id = device_id.as_deref().unwrap_or_default();

    match command {
        Command::Devices => {
            let devices = remote.list_devices();
            if devices.is_empty() {
                println!("No saved devices. Use `add <ip>` or `scan`.");
            }
            let last = remote.registry().last_connected().map(|d| d.id);
            for device in devices {
                let marker = if last.as_deref() == Some(device.id.as_str()) { "*" } else { " " };
                println!(
                    "{marker} {:<22} {}{}",
                    device.id,
                    device.name,
                    device.model.map(|m| format!(" [{m}]")).unwrap_or_default()
                );
            }
        }
        Command::Add { ip, name, port } => {
            let device = remote.add_device(&ip, name.as_deref(), port)?;
            println!("✅ Saved {} ({})", device.name, device.id);
        }
        Command::Remove { id } => {
            if remote.remove_device(&id).await? {
                println!("✅ Removed {id}");
            } else {
                println!("No saved device {id}");
            }
        }
        Command::Scan => {
            println!("🔍 Scanning via relay at {} ...", remote.manager().endpoint());
            let devices = remote.scan_network().await?;
            println!("Found {} device(s)", devices.len());
            for device in devices {
                println!("  {:<22} {}", device.id, device.name);
            }
        }
        Command::Key { code, .. } => remote.send_key(id, &code).await?,
        Command::Text { text, .. } => remote.send_text(id, &text).await?,
        Command::Cursor { dx, dy, .. } => remote.move_cursor(id, dx, dy).await?,
        Command::Tap { .. } => remote.tap(id).await?,
        Command::Scroll { delta, .. } => remote.scroll(id, delta).await?,
        Command::Apps { .. } => {
            for app in remote.fetch_apps(id).await? {
                println!("{:<40} {}", app.package_name, app.label);
            }
        }
        Command::Launch { package, .. } => remote.launch_app(id, &package).await?,
        Command::PowerOff { .. } => remote.power_off(id).await?,
        Command::Screenshot { output, .. } => match remote.take_screenshot(id).await? {
            Some(capture) => {
                tokio::fs::write(&output, &capture.bytes).await?;
                println!(
                    "✅ Screenshot {}x{} ({}ms) saved to {}",
                    capture.width.unwrap_or_default(),
                    capture.height.unwrap_or_default(),
                    capture.duration_ms,
                    output.display()
                );
            }
            None => println!("❌ Screenshot failed: no image received"),
        },
        Command::Wake { mac, .. } => {
            if remote.wake_on_lan(device_id.as_deref(), mac.as_deref()).await? {
                println!("✅ Wake-on-LAN packet sent");
            } else {
                println!("❌ Wake-on-LAN was not confirmed");
            }
        }
        Command::SaveMac { mac } => {
            let mac = remote.save_mac_address(&mac)?;
            println!("✅ Saved MAC {mac}");
        }
        Command::SetBridge { host, port } => {
            let endpoint = BridgeEndpoint::new(host, port);
            remote.set_bridge_endpoint(endpoint.clone())?;
            println!("✅ Relay endpoint set to {endpoint}");
        }
    }
    Ok(())
}
