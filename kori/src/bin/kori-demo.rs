use {
    kori::{AtomicReference, Config, ObjectRef, TransferMode, Value, Worker, detach},
    std::{sync::{Arc, mpsc}, time::Duration},
    tracing::info,
    tracing_subscriber::EnvFilter,
};

fn main() -> anyhow::Result<()>
{
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let ping = Worker::start(Config::named("ping"))?;
    let pong = Worker::start(Config::named("pong"))?;

    // A frozen table is readable by both workers.
    let table = ObjectRef::new("Table", [Value::from("ping"), Value::from("pong")])?;
    table.freeze()?;
    let last = Arc::new(AtomicReference::default());

    // A ball is moved back and forth, each worker bumping its counter.
    let mut ball = ObjectRef::new("Ball", [Value::Int(0)])?;
    for round in 0 .. 4 {
        let worker = if round % 2 == 0 { &ping } else { &pong };
        let record = detach(ball, TransferMode::Move)?;
        let table = table.clone();
        let remote = last.clone();
        let future = worker.execute(TransferMode::Move, move || {
            let ball = record.attach();
            let hits = ball.get(0)?.as_int().unwrap_or(0) + 1;
            ball.set(0, Value::Int(hits))?;
            remote.set(table.get(round % 2)?)?;
            Ok(ball)
        })?;
        ball = future.consume()?;
        let hits = ball.get(0)?.as_int();
        info!(round, ?hits, last = ?last.get().as_str(), "Ball returned");
    }

    let (sender, receiver) = mpsc::channel();
    ping.execute_after(Duration::from_millis(10), move || {
        info!("Delayed job ran");
        sender.send(())?;
        Ok(())
    })?;
    receiver.recv_timeout(Duration::from_secs(1))?;

    let stopped = [ping.request_termination(true), pong.request_termination(true)];
    for future in stopped {
        future.consume()?;
    }
    Ok(())
}
