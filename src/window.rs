use chrono::{DateTime, Duration, FixedOffset, Utc};

/// All report deadlines are defined in KST (UTC+9, no DST).
pub fn kst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap()
}

/// The daily report window: a half-open interval [start, end) covering the
/// evening (18:00–24:00 KST) that ended at the most recent local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportWindow {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
}

impl ReportWindow {
    /// Window for the evening preceding `now`. `now` is truncated down to the
    /// most recent local midnight, so a check running at 00:05 or at 13:00
    /// evaluates the same prior evening.
    pub fn most_recent(now: DateTime<FixedOffset>) -> Self {
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_local_timezone(now.timezone())
            .unwrap();
        Self {
            start: midnight - Duration::hours(6),
            end: midnight,
        }
    }

    pub fn current() -> Self {
        Self::most_recent(Utc::now().with_timezone(&kst()))
    }

    /// Explicit window bounds, e.g. from the CLI override. Empty and
    /// inverted intervals are rejected.
    pub fn from_bounds(
        start: DateTime<FixedOffset>,
        end: DateTime<FixedOffset>,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(
            start < end,
            "window start {} is not before window end {}",
            start.to_rfc3339(),
            end.to_rfc3339()
        );
        Ok(Self { start, end })
    }

    /// Half-open containment: the 18:00:00 boundary is in, midnight is out.
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        let start = self.start.with_timezone(&Utc);
        let end = self.end.with_timezone(&Utc);
        ts >= start && ts < end
    }

    /// True when `ts` precedes the window entirely; history pagination stops
    /// once messages this old are reached.
    pub fn precedes(&self, ts: DateTime<Utc>) -> bool {
        ts < self.start.with_timezone(&Utc)
    }
}

impl std::fmt::Display for ReportWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} .. {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn kst_time(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<FixedOffset> {
        kst().with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn window_just_after_midnight() {
        let w = ReportWindow::most_recent(kst_time(2024, 6, 2, 0, 5, 0));
        assert_eq!(w.start, kst_time(2024, 6, 1, 18, 0, 0));
        assert_eq!(w.end, kst_time(2024, 6, 2, 0, 0, 0));
    }

    #[test]
    fn window_at_midday() {
        let w = ReportWindow::most_recent(kst_time(2024, 6, 2, 13, 0, 0));
        assert_eq!(w.start, kst_time(2024, 6, 1, 18, 0, 0));
        assert_eq!(w.end, kst_time(2024, 6, 2, 0, 0, 0));
    }

    #[test]
    fn window_just_before_midnight() {
        let w = ReportWindow::most_recent(kst_time(2024, 6, 2, 23, 59, 0));
        assert_eq!(w.start, kst_time(2024, 6, 1, 18, 0, 0));
        assert_eq!(w.end, kst_time(2024, 6, 2, 0, 0, 0));
    }

    #[test]
    fn start_boundary_is_inclusive() {
        let w = ReportWindow::most_recent(kst_time(2024, 6, 2, 0, 5, 0));
        let at_start = kst_time(2024, 6, 1, 18, 0, 0).with_timezone(&Utc);
        assert!(w.contains(at_start));
    }

    #[test]
    fn end_boundary_is_exclusive() {
        let w = ReportWindow::most_recent(kst_time(2024, 6, 2, 0, 5, 0));
        let at_end = kst_time(2024, 6, 2, 0, 0, 0).with_timezone(&Utc);
        assert!(!w.contains(at_end));
        assert!(w.contains(at_end - Duration::seconds(1)));
    }

    #[test]
    fn messages_before_window_precede_it() {
        let w = ReportWindow::most_recent(kst_time(2024, 6, 2, 0, 5, 0));
        let early = kst_time(2024, 6, 1, 17, 59, 59).with_timezone(&Utc);
        assert!(w.precedes(early));
        assert!(!w.precedes(w.start.with_timezone(&Utc)));
    }

    #[test]
    fn explicit_bounds_must_be_ordered() {
        let start = kst_time(2024, 6, 1, 18, 0, 0);
        let end = kst_time(2024, 6, 2, 0, 0, 0);

        let w = ReportWindow::from_bounds(start, end).unwrap();
        assert_eq!(w.start, start);
        assert_eq!(w.end, end);

        assert!(ReportWindow::from_bounds(end, start).is_err());
        assert!(ReportWindow::from_bounds(start, start).is_err());
    }

    #[test]
    fn window_crosses_month_boundary() {
        let w = ReportWindow::most_recent(kst_time(2024, 7, 1, 0, 5, 0));
        assert_eq!(w.start, kst_time(2024, 6, 30, 18, 0, 0));
        assert_eq!(w.end, kst_time(2024, 7, 1, 0, 0, 0));
    }
}
