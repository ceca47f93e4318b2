/// Console table of per-epoch metrics
use super::evaluation::EvalMetrics;

const RULE_WIDTH: usize = 70;

pub fn rule() -> String {
    "-".repeat(RULE_WIDTH)
}

/// `epoch | - | train loss | val loss | val acc`
pub fn epoch_row(epoch: usize, train_loss: f64, validation: &EvalMetrics) -> String {
    format!(
        " Epoch {:^7} | {:^7} | {:^12.6} | {:^10.6} | {:^9.2}",
        epoch, "-", train_loss, validation.loss, validation.accuracy
    )
}

/// Lines printed at the end of an epoch; the metrics row only appears when
/// the epoch was evaluated
pub fn epoch_lines(epoch: usize, train_loss: f64, validation: Option<&EvalMetrics>) -> Vec<String> {
    let mut lines = vec![rule()];
    if let Some(metrics) = validation {
        lines.push(epoch_row(epoch, train_loss, metrics));
        lines.push(rule());
    }
    lines
}

pub fn print_epoch(epoch: usize, train_loss: f64, validation: Option<&EvalMetrics>) {
    for line in epoch_lines(epoch, train_loss, validation) {
        println!("{}", line);
    }
    println!();
}
