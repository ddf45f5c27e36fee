use crate::model::{Reservation, Span};

/// True if any span in `existing` intersects `candidate` (half-open).
pub fn overlaps<'a>(existing: impl IntoIterator<Item = &'a Span>, candidate: &Span) -> bool {
    existing.into_iter().any(|span| span.overlaps(candidate))
}

/// First reservation whose span intersects `candidate`, if any.
pub fn first_conflict<'a>(existing: &'a [Reservation], candidate: &Span) -> Option<&'a Reservation> {
    existing.iter().find(|r| r.span.overlaps(candidate))
}

/// Merge sorted overlapping/adjacent spans into disjoint spans.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        merged.push(span);
    }
    merged
}

/// Remove `to_remove` (sorted, disjoint) from `base` (sorted, disjoint).
pub fn subtract_spans(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

/// Free sub-spans of `window` given the reservations already taken.
pub fn free_spans(window: &Span, taken: &[Reservation]) -> Vec<Span> {
    let mut busy: Vec<Span> = taken
        .iter()
        .filter(|r| r.span.overlaps(window))
        .map(|r| r.span)
        .collect();
    busy.sort_by_key(|s| s.start);
    subtract_spans(&[*window], &merge_overlapping(&busy))
}
