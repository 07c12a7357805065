use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;

use relay_core::agent::{first_name, AgentConfig};

/// Short first names, easy to type in mentions.
pub const NAME_POOL: [&str; 50] = [
    "ada", "akira", "alba", "arlo", "asha", "basil", "bryn", "cleo", "cyrus", "dara", "eiko",
    "einar", "elara", "ezra", "fern", "gael", "hana", "ines", "idris", "juno", "kai", "kira",
    "lars", "lena", "lux", "maren", "milo", "nadia", "nico", "nova", "orin", "petra", "quinn",
    "ravi", "rune", "sage", "soren", "tala", "thea", "teo", "uri", "vera", "wren", "xander",
    "yara", "zara", "zeke", "io", "leif", "sol",
];

/// Give every bare role a unique first name (`role` becomes `name.role`).
///
/// Already dotted names are kept as given and their first part is reserved.
/// Once the pool runs out, names fall back to `agent-N`.
pub fn assign_names(agents: &[AgentConfig]) -> Vec<AgentConfig> {
    assign_names_with(agents, &mut rand::thread_rng())
}

pub fn assign_names_with<R: Rng + ?Sized>(agents: &[AgentConfig], rng: &mut R) -> Vec<AgentConfig> {
    let mut available: Vec<&str> = NAME_POOL.to_vec();
    // Fisher-Yates.
    available.shuffle(rng);

    let mut used: HashSet<String> = agents
        .iter()
        .filter(|a| a.name.contains('.'))
        .map(|a| first_name(&a.name).to_string())
        .collect();

    agents
        .iter()
        .map(|agent| {
            if agent.name.contains('.') {
                return agent.clone();
            }
            let mut picked = None;
            while let Some(candidate) = available.pop() {
                if used.insert(candidate.to_string()) {
                    picked = Some(candidate.to_string());
                    break;
                }
            }
            let first = picked.unwrap_or_else(|| {
                let fallback = format!("agent-{}", used.len());
                used.insert(fallback.clone());
                fallback
            });
            AgentConfig {
                name: format!("{first}.{}", agent.name),
                ..agent.clone()
            }
        })
        .collect()
}
