//! GraphQL query templates, one per feed.
//!
//! Every template takes `$since` (ISO-8601 DateTime) and `$limit` (Int).

use crate::domain::Feed;

/// pump.fun bonding-curve program
pub const PUMP_FUN_PROGRAM: &str = "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P";

/// Tokens minted through the pump.fun program
pub const NEW_TOKENS_QUERY: &str = r#"
query NewTokens($since: DateTime, $limit: Int) {
  Solana {
    TokenSupplyUpdates(
      limit: {count: $limit}
      orderBy: {descending: Block_Time}
      where: {
        Block: {Time: {since: $since}}
        Instruction: {
          Program: {Address: {is: "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P"}, Method: {is: "create"}}
        }
      }
    ) {
      Block { Time }
      Transaction { Signer }
      TokenSupplyUpdate {
        PostBalance
        Currency { Name Symbol MintAddress UpdateAuthority }
      }
    }
  }
}
"#;

/// Tokens that completed their bonding curve and migrated to an AMM
pub const GRADUATED_QUERY: &str = r#"
query Graduated($since: DateTime, $limit: Int) {
  Solana {
    Instructions(
      limit: {count: $limit}
      orderBy: {descending: Block_Time}
      where: {
        Block: {Time: {since: $since}}
        Instruction: {
          Program: {Address: {is: "6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P"}}
          Logs: {includes: {includes: "Migrate"}}
        }
        Transaction: {Result: {Success: true}}
      }
    ) {
      Block { Time }
      Instruction {
        Accounts {
          Token { Mint Owner }
        }
      }
    }
  }
}
"#;

/// Quote-side mints that show up in pool accounts but are never candidates
pub const QUOTE_MINTS: [&str; 2] = [
    "So11111111111111111111111111111111111111112",
    "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v",
];

/// Tokens ranked by USD trade volume inside the window
pub const TRENDING_QUERY: &str = r#"
query Trending($since: DateTime, $limit: Int) {
  Solana {
    DEXTradeByTokens(
      limit: {count: $limit}
      orderBy: {descendingByField: "volume"}
      where: {
        Block: {Time: {since: $since}}
        Transaction: {Result: {Success: true}}
        Trade: {Currency: {MintAddress: {notIn: [
          "So11111111111111111111111111111111111111112",
          "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"
        ]}}}
      }
    ) {
      Trade {
        Currency { Name Symbol MintAddress }
        price: PriceInUSD(maximum: Block_Time)
      }
      volume: sum(of: Trade_Side_AmountInUSD)
      buys: count(if: {Trade: {Side: {Type: {is: buy}}}})
    }
  }
}
"#;

pub fn query_for(feed: Feed) -> &'static str {
    match feed {
        Feed::NewTokens => NEW_TOKENS_QUERY,
        Feed::Graduated => GRADUATED_QUERY,
        Feed::Trending => TRENDING_QUERY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queries_take_window_variables() {
        for feed in [Feed::NewTokens, Feed::Graduated, Feed::Trending] {
            let query = query_for(feed);
            assert!(query.contains("$since: DateTime"), "{feed} missing $since");
            assert!(query.contains("$limit: Int"), "{feed} missing $limit");
        }
    }

    #[test]
    fn test_trending_excludes_quote_mints() {
        for mint in QUOTE_MINTS {
            assert!(TRENDING_QUERY.contains(mint), "trending query does not exclude {mint}");
        }
    }

    #[test]
    fn test_pump_queries_reference_program() {
        assert!(NEW_TOKENS_QUERY.contains(PUMP_FUN_PROGRAM));
        assert!(GRADUATED_QUERY.contains(PUMP_FUN_PROGRAM));
    }
}
