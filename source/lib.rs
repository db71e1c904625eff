// A small interactive client for a line-oriented, tagged IMAP-family protocol
// (https://www.rfc-editor.org/rfc/rfc1176, https://www.rfc-editor.org/rfc/rfc3501).

#![allow(clippy::upper_case_acronyms)]

use anyhow::Context as _;
use std::{net, process, str, time};
use zeroize::Zeroize as _;

mod address;
mod cache;
mod mime;
mod repl;
mod session;
mod untagged;
mod wire;

fn parse_duration(argument: &str) -> Result<time::Duration, std::num::ParseIntError> {
  Ok(time::Duration::from_secs(argument.parse()?))
}

#[derive(clap::Args)]
#[group(skip)]
pub struct Arguments {
  #[arg(help = "Server hostname")]
  pub host: String,
  #[arg(help = "Server port")]
  pub port: u16,

  #[arg(long = "timeout", help = "TCP timeout (in seconds)", value_parser = parse_duration)]
  pub timeout: Option<time::Duration>,

  #[arg(long = "user", help = "IMAP user")]
  pub user: String,
  #[arg(last = true, required = true, help = "Password command, run once at startup")]
  pub password_command: Vec<String>,

  #[arg(long = "tls", help = "Enable TLS", default_value_t = false)]
  pub tls: bool,

  #[arg(
    long = "namespace",
    help = "Name used for the log file",
    default_value_t = String::from("tagmail")
  )]
  pub namespace: String,
}

fn credentials(user: &str, password_command: &[String]) -> anyhow::Result<(String, String)> {
  let mut program = process::Command::new(&password_command[0]);
  let command = program.args(&password_command[1..]);
  log::info!("getting password from {command:?}");
  let output = command.output()?;
  let mut stdout = output.stdout;
  anyhow::ensure!(
    output.status.success(),
    "couldn't get password: {command:?} failed"
  );
  let password = str::from_utf8(
    stdout
      .split(|byte| *byte == b'\n')
      .next()
      .with_context(|| format!("{command:?} didn't output anything"))?,
  )
  .with_context(|| format!("{command:?} didn't output UTF-8"))?
  .to_owned();
  stdout.zeroize();
  Ok((user.to_owned(), password))
}

fn open(host: &str, port: u16, timeout: Option<time::Duration>) -> anyhow::Result<net::TcpStream> {
  use net::ToSocketAddrs as _;
  let address = (host, port)
    .to_socket_addrs()?
    .next()
    .with_context(|| format!("couldn't resolve {host}:{port}"))?;
  log::debug!("connecting to {address:?} with timeout {timeout:?}");
  Ok(match timeout {
    Some(duration) => {
      let stream = net::TcpStream::connect_timeout(&address, duration)?;
      stream.set_read_timeout(Some(duration))?;
      stream
    }
    None => net::TcpStream::connect(address)?,
  })
}

pub fn run(arguments: &Arguments) -> anyhow::Result<()> {
  anyhow::ensure!(!arguments.tls, "TLS is not supported by this client");
  let (mut user, mut password) = credentials(&arguments.user, &arguments.password_command)?;
  let stream = open(&arguments.host, arguments.port, arguments.timeout)?;
  let mut session = session::Session::new(stream);

  session.greeting().context("server greeting failed")?;

  let result = repl::run(&mut session, &user, &password).context("session failed");
  user.zeroize();
  password.zeroize();
  result
}
