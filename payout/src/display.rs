//! Terminal rendering of transfer results

use crate::transfer::{Payee, TransferDetail, TransferError};
use owo_colors::OwoColorize;

fn payee_label(payee: &Payee) -> String {
    match payee {
        Payee::LoadBalancerFee => "lb fee".to_string(),
        Payee::Node { id } => id.clone(),
    }
}

/// Status table of executed transfers, one row per transfer
pub fn render_transactions(details: &[TransferDetail]) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<24} {:<48} {:>24} {}\n",
        "PAYEE", "ADDRESS", "AMOUNT", "TRANSACTION"
    ));
    for detail in details {
        out.push_str(&format!(
            "{:<24} {:<48} {:>24} {}\n",
            payee_label(&detail.payee),
            detail.address,
            detail.amount.to_string(),
            detail.tx_hash
        ));
    }
    out
}

pub fn display_transactions_status(details: &[TransferDetail]) {
    println!("{}", "💸 Payout transactions".cyan().bold());
    if details.is_empty() {
        println!("{}", "   no transfers executed".yellow());
        return;
    }
    print!("{}", render_transactions(details));
    println!(
        "{} {}",
        "✓".green().bold(),
        format!("{} transfers completed", details.len()).green()
    );
}

pub fn display_transfer_error(error: &TransferError) {
    println!("{} {}", "✗ Payout incomplete:".red().bold(), error.message.red());
}
