//! Simulator side of the A-plus-B demo: creates the segment, sends operand
//! pairs on even turns, reads the agent's sums back, then signals shutdown
//! and tears the segment down.

use rand::Rng;
use tandem::prelude::*;
use tandem_apb::{ApbAct, ApbEnv, APB_CHANNEL, ROUNDS};

fn main() {
    tracing_subscriber::fmt::init();

    let config = PoolConfig::from_env();
    let pool = match ShmPool::open(config) {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("apb_sim: {}", e);
            std::process::exit(1);
        }
    };
    if !pool.is_creator() {
        tracing::warn!("expected to create the segment; attached to an existing one");
    }

    let mut chan = PairChannel::<ApbEnv, ApbAct>::new(&pool, APB_CHANNEL);
    chan.set_condition(2, 0);

    let mut rng = rand::thread_rng();
    let mut sent = ApbEnv { a: 0, b: 0 };

    for round in 0..ROUNDS {
        // Our even turn: check the agent's answer to the previous round,
        // then publish the next operands within the same turn.
        if round > 0 {
            let sum = chan.response().c;
            assert_eq!(sum, sent.a + sent.b, "round {}", round - 1);
        }
        sent = ApbEnv {
            a: rng.gen_range(1..=10),
            b: rng.gen_range(1..=10),
        };
        *chan.request_mut() = sent;
        tracing::debug!(round, a = sent.a, b = sent.b, "sent");
        chan.set_completed();
    }

    // Collect the final answer and hand the agent one last turn that only
    // carries the shutdown flag.
    let sum = chan.response().c;
    assert_eq!(sum, sent.a + sent.b);
    chan.set_finished();
    chan.set_completed();

    println!("apb_sim: {} rounds verified", ROUNDS);

    drop(chan);
    if let Err(e) = pool.teardown() {
        eprintln!("apb_sim: teardown: {}", e);
        std::process::exit(1);
    }
}
