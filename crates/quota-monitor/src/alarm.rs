//! Edge-triggered two-state threshold alarm.

use quota_types::status::AlarmState;

/// A change of [`AlarmState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmTransition {
    /// OK to ALARM. Remediation runs once per raise.
    Raised,
    /// ALARM to OK.
    Cleared,
}

/// Goes to ALARM when the metric exceeds the threshold and back to OK when it
/// drops to the threshold or below. Only state changes are reported, so a metric
/// that stays above the threshold raises once.
#[derive(Debug, Clone)]
pub struct ThresholdAlarm {
    threshold: i64,
    state: AlarmState,
}

impl ThresholdAlarm {
    /// A new alarm starts in OK.
    pub fn new(threshold: i64) -> Self {
        Self {
            threshold,
            state: AlarmState::Ok,
        }
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    pub fn evaluate(&mut self, metric: i64) -> Option<AlarmTransition> {
        let breaching = metric > self.threshold;
        match (self.state, breaching) {
            (AlarmState::Ok, true) => {
                self.state = AlarmState::Alarm;
                Some(AlarmTransition::Raised)
            }
            (AlarmState::Alarm, false) => {
                self.state = AlarmState::Ok;
                Some(AlarmTransition::Cleared)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::{AlarmTransition, ThresholdAlarm};
    use quota_types::status::AlarmState;

    #[test]
    fn raises_once_per_crossing() {
        let mut alarm = ThresholdAlarm::new(20);
        let transitions: Vec<_> = [25, 25, 15, 25]
            .into_iter()
            .map(|metric| alarm.evaluate(metric))
            .collect();
        assert_eq!(
            transitions,
            vec![
                Some(AlarmTransition::Raised),
                None,
                Some(AlarmTransition::Cleared),
                Some(AlarmTransition::Raised)
            ]
        );
        let raises = transitions
            .iter()
            .filter(|t| **t == Some(AlarmTransition::Raised))
            .count();
        assert_eq!(raises, 2);
        assert_eq!(alarm.state(), AlarmState::Alarm);
    }

    #[test]
    fn threshold_itself_does_not_breach() {
        let mut alarm = ThresholdAlarm::new(20);
        assert_eq!(alarm.evaluate(20), None);
        assert_eq!(alarm.state(), AlarmState::Ok);
        assert_eq!(alarm.evaluate(21), Some(AlarmTransition::Raised));
        assert_eq!(alarm.evaluate(20), Some(AlarmTransition::Cleared));
    }

    #[test]
    fn negative_metric_keeps_alarm_ok() {
        let mut alarm = ThresholdAlarm::new(20);
        assert_eq!(alarm.evaluate(-5), None);
        assert_eq!(alarm.evaluate(0), None);
        assert_eq!(alarm.state(), AlarmState::Ok);
    }
}
