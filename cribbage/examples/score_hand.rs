//! Hand Scoring Example
//!
//! Scores a few well-known hands and prints the breakdown.
//!
//! ```text
//! cargo run --example score_hand -- 5C 5D 5S JH 5H
//! ```

use cribbage::{entities::Card, game::scoring::score_hand};

fn print_score(hand: &[Card; 4], starter: Card, is_crib: bool) {
    let score = score_hand(hand, starter, is_crib);
    let cards: Vec<String> = hand.iter().map(ToString::to_string).collect();
    println!("Hand: {}  Starter: {starter}", cards.join(" "));
    for set in &score.fifteen_sets {
        let set: Vec<String> = set.iter().map(ToString::to_string).collect();
        println!("  fifteen: {}", set.join(" + "));
    }
    for run in &score.run_sets {
        let run: Vec<String> = run.iter().map(ToString::to_string).collect();
        println!("  run: {}", run.join(" "));
    }
    println!(
        "  fifteens {} / pairs {} / runs {} / flush {} / nobs {} = {}\n",
        score.fifteens, score.pairs, score.runs, score.flush, score.nobs, score.total
    );
}

fn parse(codes: &[&str]) -> Result<([Card; 4], Card), String> {
    let cards = codes
        .iter()
        .map(|code| code.parse::<Card>().map_err(|e| e.to_string()))
        .collect::<Result<Vec<_>, _>>()?;
    match cards.as_slice() {
        [a, b, c, d, starter] => Ok(([*a, *b, *c, *d], *starter)),
        _ => Err(format!("expected 5 cards (4 + starter), got {}", cards.len())),
    }
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if !args.is_empty() {
        let codes: Vec<&str> = args.iter().map(String::as_str).collect();
        match parse(&codes) {
            Ok((hand, starter)) => print_score(&hand, starter, false),
            Err(e) => eprintln!("{e}"),
        }
        return;
    }

    println!("=== Cribbage Hand Scoring Example ===\n");
    for codes in [
        ["5C", "5D", "5S", "JH", "5H"],
        ["5C", "5D", "JH", "10S", "5H"],
        ["7H", "7S", "8D", "8C", "9H"],
        ["2H", "4H", "6H", "8H", "KS"],
    ] {
        match parse(&codes) {
            Ok((hand, starter)) => print_score(&hand, starter, false),
            Err(e) => eprintln!("{e}"),
        }
    }
}
