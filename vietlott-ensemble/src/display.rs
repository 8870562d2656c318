use comfy_table::{presets::UTF8_FULL, Cell, Color, ContentArrangement, Table};

use vietlott_db::models::{Draw, EnsembleWeights, MatchResult, PredictionCycle, TrainingLog};

use crate::cycle::retrain::RetrainDecision;
use crate::cycle::CheckOutcome;
use crate::pipeline::{GeneratedPrediction, IngestReport, TrainReport};

fn table() -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL).set_content_arrangement(ContentArrangement::Dynamic);
    table
}

fn numbers(ns: &[u8]) -> String {
    ns.iter().map(|n| format!("{n:02}")).collect::<Vec<_>>().join(" - ")
}

fn special(s: Option<u8>) -> String {
    s.map(|s| format!("{s:02}")).unwrap_or_default()
}

pub fn display_ingest(report: &IngestReport) {
    let mut t = table();
    t.set_header(vec!["Inserted", "Duplicates", "Invalid"]);
    t.add_row(vec![report.inserted.to_string(), report.duplicates.to_string(), report.invalid.to_string()]);
    println!("{t}");
}

pub fn display_train_report(report: &TrainReport) {
    let mut t = table();
    t.set_header(vec!["Model", "Metric", "Value"]);
    for (model, metrics) in &report.metrics {
        let mut names: Vec<&String> = metrics.keys().collect();
        names.sort();
        for name in names {
            t.add_row(vec![model.clone(), name.clone(), format!("{:.4}", metrics[name])]);
        }
    }
    for (model, reason) in &report.skipped {
        t.add_row(vec![
            Cell::new(model),
            Cell::new("skipped").fg(Color::Yellow),
            Cell::new(reason),
        ]);
    }
    println!("{t}");
}

pub fn display_weights(weights: &EnsembleWeights) {
    let mut t = table();
    t.set_header(vec!["Signal", "Weight", "Contribution"]);
    for (name, w) in [("sequence", weights.sequence), ("secondary", weights.secondary), ("statistical", weights.statistical)] {
        let bar = "█".repeat((w * 30.0).round() as usize);
        t.add_row(vec![name.to_string(), format!("{w:.3}"), bar]);
    }
    println!("{t}");
}

pub fn display_prediction(pred: &GeneratedPrediction) {
    println!(
        "\n== {} cycle #{} ({}) ==\n",
        pred.variant.label(),
        pred.cycle_number,
        if pred.is_new { "new prediction" } else { "existing prediction" }
    );
    let mut t = table();
    t.set_header(vec!["Numbers", "Special", "Model version"]);
    t.add_row(vec![
        Cell::new(numbers(&pred.numbers)).fg(Color::Green),
        Cell::new(special(pred.special)),
        Cell::new(&pred.model_version),
    ]);
    println!("{t}");
    display_weights(&pred.weights_used);
    if !pred.fallbacks.is_empty() {
        println!("fallbacks: {}", pred.fallbacks.join(", "));
    }
}

pub fn display_check(outcome: &CheckOutcome) {
    let r = &outcome.record;
    let mut t = table();
    t.set_header(vec!["Draw", "Predicted", "Actual", "Matched", "Special", "Tier"]);
    let tier = Cell::new(r.prize_tier.as_str());
    t.add_row(vec![
        Cell::new(format!("{} ({}/{})", r.draw_id, r.draw_number, outcome.cycle.max_draws)),
        Cell::new(numbers(&r.predicted)),
        Cell::new(format!("{} {}", numbers(&r.actual), special(r.actual_special))),
        Cell::new(format!("{} [{}]", r.matched_count, numbers(&r.matched))),
        Cell::new(if r.special_matched { "yes" } else { "" }),
        if r.prize_tier.is_winning() { tier.fg(Color::Green) } else { tier },
    ]);
    println!("{t}");
    if !outcome.is_new {
        println!("(already checked, cycle not advanced)");
    }
    if outcome.cycle_completed() {
        println!("cycle #{} completed", outcome.cycle.cycle_number);
    }
}

pub fn display_decision(decision: &RetrainDecision) {
    let mut t = table();
    t.set_header(vec!["Retrain", "3+ hits", "4+ hits", "Best match", "Reason"]);
    let flag = if decision.should_retrain {
        Cell::new("yes").fg(Color::Yellow)
    } else {
        Cell::new("no")
    };
    t.add_row(vec![
        flag,
        Cell::new(decision.hit_3plus),
        Cell::new(decision.hit_4plus),
        Cell::new(decision.max_match),
        Cell::new(&decision.reason),
    ]);
    println!("{t}");
    display_weights(&decision.weights);
}

pub fn display_draws(draws: &[Draw]) {
    let mut t = table();
    t.set_header(vec!["Draw", "Date", "Session", "Numbers", "Special", "Jackpot"]);
    for d in draws {
        t.add_row(vec![
            d.draw_id.clone(),
            d.draw_date.to_string(),
            d.session.map(|s| s.to_string()).unwrap_or_default(),
            numbers(&d.numbers),
            special(d.special),
            d.jackpot_amount.map(|j| j.to_string()).unwrap_or_default(),
        ]);
    }
    println!("{t}");
}

pub fn display_cycles(cycles: &[(PredictionCycle, Vec<MatchResult>)]) {
    let mut t = table();
    t.set_header(vec!["Cycle", "Status", "Draws", "Best match", "3+ hits", "Version"]);
    for (c, records) in cycles {
        let best = records.iter().map(|r| r.matched_count).max().unwrap_or(0);
        let hits = records.iter().filter(|r| r.matched_count >= 3).count();
        t.add_row(vec![
            format!("#{}", c.cycle_number),
            c.status.as_str().to_string(),
            format!("{}/{}", c.draws_tracked, c.max_draws),
            best.to_string(),
            hits.to_string(),
            c.model_version.clone(),
        ]);
    }
    println!("{t}");
}

pub fn display_training_logs(logs: &[TrainingLog]) {
    let mut t = table();
    t.set_header(vec!["When", "Cycle", "Status", "Before", "After", "Reason"]);
    for log in logs {
        t.add_row(vec![
            log.created_at.format("%Y-%m-%d %H:%M").to_string(),
            log.cycle_id.to_string(),
            log.status.as_str().to_string(),
            log.weights_before.to_string(),
            log.weights_after.map(|w| w.to_string()).unwrap_or_default(),
            log.reason.clone(),
        ]);
    }
    println!("{t}");
}
