use clap::Parser;
use std::{
    error::Error,
    io::{self, ErrorKind},
    net::{SocketAddr, TcpStream},
    time::Duration,
};

use camwire::{
    Command, config::DEFAULT_PORT, describe, prompt,
    protocol::{ProtocolTransport, TransportError},
};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Server address
    #[arg(default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))]
    address: SocketAddr,
    /// Stop printing responses after this many milliseconds of silence
    #[arg(long, default_value_t = 500)]
    wait_ms: u64,
}

fn main() -> Result<(), Box<dyn Error>> {
    // Initialize env_logger; For logging to STDOUT/STDERR
    env_logger::init();

    let cli = Cli::parse();
    let stream = TcpStream::connect(cli.address)?;
    stream.set_read_timeout(Some(Duration::from_millis(cli.wait_ms.max(1))))?;
    let mut transport = ProtocolTransport::new(stream);

    loop {
        let cmd = match prompt(io::stdin().lock(), io::stdout().lock()) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("error: {e}");
                continue;
            }
        };

        match cmd {
            Command::Exit => break,
            Command::Empty => {}
            Command::Send(message) => transport.write_message(&message)?,
        }

        if !print_responses(&mut transport)? {
            eprintln!("server closed the connection");
            break;
        }
    }

    Ok(())
}

/// Prints responses until the server goes quiet. Returns `false` once the
/// connection is closed.
fn print_responses(transport: &mut ProtocolTransport<TcpStream>) -> Result<bool, TransportError> {
    loop {
        match transport.read_response() {
            Ok(message) => println!("{}", describe(&message)),
            Err(TransportError::Io(e))
                if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) =>
            {
                return Ok(true);
            }
            Err(TransportError::Closed) => return Ok(false),
            Err(TransportError::Decode(e)) => eprintln!("error: {e}"),
            Err(e) => return Err(e),
        }
    }
}
