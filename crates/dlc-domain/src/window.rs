// window.rs
use crate::DomainError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Ventana temporal de un override: `[start, end)` en UTC.
///
/// Invariante: `start < end`. Las marcas se truncan a segundos enteros, que
/// es la precisión con la que el tracker persiste fechas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideWindow {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

/// Relación entre una ventana existente y una propuesta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowRelation {
    /// Mismas fechas de inicio y fin.
    Duplicate,
    /// Las ventanas se tocan en un único instante (fin = inicio).
    Contiguous,
    /// Cualquier otra intersección.
    Overlap,
    /// Sin intersección.
    Disjoint,
}

impl OverrideWindow {
    /// Construye una ventana válida; rechaza `start >= end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, DomainError> {
        let start = truncate_seconds(start);
        let end = truncate_seconds(end);
        if start >= end {
            return Err(DomainError::Validation(format!("window start {start} is not before end {end}")));
        }
        Ok(OverrideWindow { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Duración de la ventana en minutos enteros (lo que consume el
    /// head-end como `overrideDuration`).
    pub fn duration_minutes(&self) -> i64 {
        (self.end - self.start).num_seconds() / 60
    }

    /// `true` si `now` cae dentro del período de aplicación
    /// (`start <= now < end`).
    pub fn is_enforced_at(&self, now: DateTime<Utc>) -> bool {
        self.start <= now && now < self.end
    }

    /// Clasifica la ventana propuesta `other` contra esta ventana ya
    /// registrada. El duplicado gana sobre la contigüidad: dos ventanas
    /// idénticas nunca se tratan como contiguas.
    pub fn relation_to(&self, other: &OverrideWindow) -> WindowRelation {
        if self.start == other.start && self.end == other.end {
            WindowRelation::Duplicate
        } else if self.end == other.start || self.start == other.end {
            WindowRelation::Contiguous
        } else if self.start < other.end && self.end > other.start {
            WindowRelation::Overlap
        } else {
            WindowRelation::Disjoint
        }
    }

    /// Ventana desplazada: mismo fin, inicio corrido `minutes` hacia
    /// adelante. Usada por el backoff de dirección opuesta.
    pub fn with_start_pushed(&self, minutes: i64) -> Result<Self, DomainError> {
        OverrideWindow::new(self.start + Duration::minutes(minutes), self.end)
    }
}

/// Trunca una marca de tiempo a segundos enteros.
pub fn truncate_seconds(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts - Duration::nanoseconds(i64::from(ts.timestamp_subsec_nanos()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 6, 9, h, m, 0).unwrap()
    }

    #[test]
    fn rejects_inverted_and_empty_windows() {
        assert!(OverrideWindow::new(at(10, 30), at(10, 0)).is_err());
        assert!(OverrideWindow::new(at(10, 0), at(10, 0)).is_err());
    }

    #[test]
    fn duration_is_whole_minutes() {
        let w = OverrideWindow::new(at(10, 0), at(10, 30)).unwrap();
        assert_eq!(w.duration_minutes(), 30);
    }

    #[test]
    fn touching_windows_are_contiguous_not_overlapping() {
        let existing = OverrideWindow::new(at(10, 0), at(10, 30)).unwrap();
        let proposed = OverrideWindow::new(at(10, 30), at(11, 0)).unwrap();
        assert_eq!(existing.relation_to(&proposed), WindowRelation::Contiguous);
        assert_eq!(proposed.relation_to(&existing), WindowRelation::Contiguous);
    }

    #[test]
    fn identical_windows_are_duplicates() {
        let a = OverrideWindow::new(at(10, 0), at(10, 30)).unwrap();
        let b = OverrideWindow::new(at(10, 0), at(10, 30)).unwrap();
        assert_eq!(a.relation_to(&b), WindowRelation::Duplicate);
    }

    #[test]
    fn partial_intersection_is_overlap() {
        let existing = OverrideWindow::new(at(10, 0), at(10, 30)).unwrap();
        let proposed = OverrideWindow::new(at(10, 15), at(10, 45)).unwrap();
        assert_eq!(existing.relation_to(&proposed), WindowRelation::Overlap);
        let contained = OverrideWindow::new(at(10, 5), at(10, 10)).unwrap();
        assert_eq!(existing.relation_to(&contained), WindowRelation::Overlap);
    }

    #[test]
    fn disjoint_windows_do_not_conflict() {
        let existing = OverrideWindow::new(at(10, 0), at(10, 30)).unwrap();
        let proposed = OverrideWindow::new(at(11, 0), at(11, 30)).unwrap();
        assert_eq!(existing.relation_to(&proposed), WindowRelation::Disjoint);
    }

    #[test]
    fn enforcement_window_is_half_open() {
        let w = OverrideWindow::new(at(10, 0), at(10, 30)).unwrap();
        assert!(w.is_enforced_at(at(10, 0)));
        assert!(w.is_enforced_at(at(10, 29)));
        assert!(!w.is_enforced_at(at(10, 30)));
        assert!(!w.is_enforced_at(at(9, 59)));
    }

    #[test]
    fn pushed_start_applies_backoff() {
        let w = OverrideWindow::new(at(10, 30), at(10, 45)).unwrap();
        let pushed = w.with_start_pushed(5).unwrap();
        assert_eq!(pushed.start(), at(10, 35));
        assert_eq!(pushed.end(), at(10, 45));
    }
}
