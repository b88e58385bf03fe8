use std::time::Duration;

use subproc::prelude::*;

fn main() -> Result<(), Box<dyn std::error::Error>> {
  tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

  let line = std::env::args().nth(1).unwrap_or_else(|| "echo hello world | tr a-z A-Z | wc -c".to_string());
  let builder = PipelineBuilder::parse(&line)?.timeout(Duration::from_secs(10));
  println!("plan: {}", builder.plan());

  let mut last = builder.run()?;
  print!("{}", last.out()?);
  println!("exit: {} (pid {})", last.return_code()?, last.pid()?);

  let mut echo = Invocation::new("cat")?;
  echo.run(false, &RunOptions::default())?;
  echo.send("ping\n")?;
  echo.expect("ping")?;
  let code = echo.block()?;
  println!("{} answered, exit {}", echo, code);
  Ok(())
}
