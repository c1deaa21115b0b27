use crate::screener::ScreenerKind;
use crate::strategy::SignalPolicyKind;

pub fn run() {
    println!("Screeners:");
    for kind in ScreenerKind::ALL {
        println!("  {}", kind);
    }
    println!("Signal policies:");
    for kind in SignalPolicyKind::ALL {
        println!("  {}", kind);
    }
}
