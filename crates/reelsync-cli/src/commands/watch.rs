//! Watch command handler

use anyhow::{bail, Result};

use reelsync_core::PeerEvent;

use crate::commands::SessionContext;
use crate::output::{Output, OutputFormat};

/// Print every status change until Ctrl-C or the connection ends
pub async fn watch(ctx: &SessionContext, output: &Output) -> Result<()> {
    let mut session = ctx.open_session();

    let format = output.format;
    session.subscribe(move |status| Output::new(format).print_status(status));
    session.start();

    if !session.has_client() {
        match session.last_connect_error() {
            Some(error) => bail!("Could not connect: {}", error),
            None => bail!(
                "Sync is offline, nothing to watch. Connect with: reelsync mode connected"
            ),
        }
    }

    loop {
        tokio::select! {
            event = session.next_peer_event() => {
                match event {
                    Some(event) => {
                        if format == OutputFormat::Human {
                            log_event(&event);
                        }
                    }
                    None => {
                        output.message("Connection closed");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    session.shutdown();
    Ok(())
}

fn log_event(event: &PeerEvent) {
    let (verb, descriptor) = match event {
        PeerEvent::Hi(d) => ("joined", d),
        PeerEvent::Bye(d) => ("left", d),
    };
    let name = descriptor
        .id
        .as_deref()
        .or(descriptor.url.as_deref())
        .or(descriptor.wire.as_deref())
        .unwrap_or("unnamed peer");
    println!("  peer {} {}", name, verb);
}
