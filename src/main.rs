use std::io::{Read, Write};
use std::thread;

use shoal::{Interface, StackConfig};

const LISTEN_PORT: u16 = 8080;

/// Brings up the tun device and echoes back anything a connecting peer
/// sends, one accepted connection at a time, handled on its own thread.
fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt::init();

    let mut iface = Interface::new(StackConfig::default())?;
    let mut listener = iface
        .bind(LISTEN_PORT)
        .expect("listen port is free on a freshly created interface");

    loop {
        let mut stream = listener.accept()?;
        thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match stream.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if stream.write_all(&buf[..n]).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "connection read failed");
                        break;
                    }
                }
            }
        });
    }
}
