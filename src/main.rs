pub mod command;
pub mod error;
pub mod kit_names;
pub mod kit_switch;
pub mod kit_sync;
pub mod midi_port;
pub mod roland;
pub mod settings;
pub mod user_session;
pub mod v71_sim;

#[tokio::main]
async fn main() {
    env_logger::init();
    log::info!("v71 control started");
    let settings = settings::SETTINGS.clone();

    // Demo wiring: a simulated module stands in for the Bluetooth MIDI
    // transport. A real host hands over the channel ends of its own port
    // in exactly the same shape.
    let (wire_tx, chunk_rx, port_ctl_tx, _module) = v71_sim::start(v71_sim::SimOptions::default());
    let (names_tx, _names) = kit_names::start();
    let (reply_tx, _reply_slot) = kit_sync::reply::start();
    let _inbound = kit_sync::start_inbound(chunk_rx, reply_tx.clone());
    let (engine_tx, _engine) =
        kit_sync::start(wire_tx, reply_tx, names_tx, Some(port_ctl_tx), settings);

    let (mut command_rx, _listener) = match user_session::start().await {
        Ok(parts) => parts,
        Err(e) => {
            log::error!("cannot open the console listener: {}", e);
            return;
        }
    };
    while let Some(command) = command_rx.recv().await {
        if engine_tx.send(command).await.is_err() {
            log::error!("engine is gone");
            break;
        }
    }
}
