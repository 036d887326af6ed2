//! Browser User-Agent strings assigned to outbound HTTP clients.
//!
//! The catalog serves bot-looking clients an interstitial page instead of the
//! document, so every client presents a desktop browser string. Each proxy
//! client draws one at construction and keeps it for the run.

use rand::seq::SliceRandom;

const BROWSER_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/130.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:132.0) Gecko/20100101 Firefox/132.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_6) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/18.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36 Edg/131.0.0.0",
];

/// Picks a browser User-Agent at random.
#[must_use]
pub(crate) fn random_browser_user_agent() -> &'static str {
    BROWSER_USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(BROWSER_USER_AGENTS[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_user_agent_is_from_pool() {
        for _ in 0..20 {
            let ua = random_browser_user_agent();
            assert!(BROWSER_USER_AGENTS.contains(&ua));
        }
    }

    #[test]
    fn test_user_agents_look_like_browsers() {
        for ua in BROWSER_USER_AGENTS {
            assert!(ua.starts_with("Mozilla/5.0"), "unexpected UA: {ua}");
        }
    }
}
