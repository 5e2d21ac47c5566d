//! Trading labels derived from a quote's daily move.

/// Action label for a daily percentage change.
pub fn derive_signal(change_pct: f64) -> &'static str {
    if change_pct >= 5.0 {
        "STRONG BUY"
    } else if change_pct > 2.0 {
        "BUY"
    } else if change_pct <= -5.0 {
        "STRONG SELL"
    } else if change_pct < -2.0 {
        "SELL"
    } else {
        "HOLD"
    }
}

/// Strategy label for a daily percentage change.
pub fn derive_strategy(change_pct: f64) -> &'static str {
    if change_pct >= 5.0 {
        "Breakout Play"
    } else if change_pct > 2.0 {
        "The Setup"
    } else if change_pct < -2.0 {
        "The Fade"
    } else if change_pct > 0.5 {
        "Steady Growth"
    } else if change_pct < -0.5 {
        "The Creep"
    } else {
        "Consolidation"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_thresholds() {
        assert_eq!(derive_signal(5.0), "STRONG BUY");
        assert_eq!(derive_signal(2.01), "BUY");
        assert_eq!(derive_signal(2.0), "HOLD");
        assert_eq!(derive_signal(-2.0), "HOLD");
        assert_eq!(derive_signal(-2.5), "SELL");
        assert_eq!(derive_signal(-5.0), "STRONG SELL");
    }

    #[test]
    fn test_strategy_thresholds() {
        assert_eq!(derive_strategy(7.2), "Breakout Play");
        assert_eq!(derive_strategy(3.0), "The Setup");
        assert_eq!(derive_strategy(1.0), "Steady Growth");
        assert_eq!(derive_strategy(0.2), "Consolidation");
        assert_eq!(derive_strategy(-0.8), "The Creep");
        assert_eq!(derive_strategy(-6.0), "The Fade");
    }
}
