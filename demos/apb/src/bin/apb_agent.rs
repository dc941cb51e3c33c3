//! Agent side of the A-plus-B demo: attaches to the simulator's segment,
//! answers each operand pair with its sum on odd turns, and exits when the
//! simulator flips the shutdown flag.

use tandem::prelude::*;
use tandem_apb::{ApbAct, ApbEnv, APB_CHANNEL};

fn main() {
    tracing_subscriber::fmt::init();

    let config = PoolConfig::from_env();
    let pool = match ShmPool::open(config) {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("apb_agent: {}", e);
            std::process::exit(1);
        }
    };

    let mut chan = PairChannel::<ApbEnv, ApbAct>::new(&pool, APB_CHANNEL);
    chan.set_condition(2, 1);

    let mut answered = 0u32;
    loop {
        // Our odd turn: the simulator either published operands or flipped
        // the shutdown flag during its final turn.
        let env = *chan.request();
        if chan.is_finished() {
            chan.get_completed();
            break;
        }
        chan.response_mut().c = env.a + env.b;
        tracing::debug!(a = env.a, b = env.b, "answered");
        chan.set_completed();
        answered += 1;
    }

    println!("apb_agent: answered {} rounds", answered);

    drop(chan);
    if let Err(e) = pool.teardown() {
        eprintln!("apb_agent: teardown: {}", e);
        std::process::exit(1);
    }
}
