//! Troceo acotado de unidades de despacho.
//!
//! Cada unidad se corta en trozos de a lo sumo `max` miembros. Una cola
//! menor a la mitad del tope se pliega en el trozo anterior (que queda de
//! hasta `max + max/2`); una cola de la mitad o más sale como trozo
//! propio. Así no se emiten unidades residuales diminutas.

use super::unit::{DispatchMember, DispatchUnit};

/// Corta la lista de miembros según la regla de plegado.
pub fn chunk_members(members: Vec<DispatchMember>, max: usize) -> Vec<Vec<DispatchMember>> {
    let max = max.max(1);
    let total = members.len();
    if total == 0 {
        return Vec::new();
    }

    let remainder = total % max;
    let mut sizes: Vec<usize> = vec![max; total / max];
    if remainder > 0 {
        if remainder < max / 2 && !sizes.is_empty() {
            // Cola corta: se pliega en el último trozo.
            let last = sizes.len() - 1;
            sizes[last] += remainder;
        } else {
            sizes.push(remainder);
        }
    }

    let mut chunks = Vec::with_capacity(sizes.len());
    let mut members = members.into_iter();
    for size in sizes {
        chunks.push(members.by_ref().take(size).collect());
    }
    chunks
}

/// Trocea una unidad en varias con los mismos metadatos.
pub fn chunk_unit(unit: DispatchUnit, max: usize) -> Vec<DispatchUnit> {
    if unit.members.len() <= max {
        return vec![unit];
    }

    let DispatchUnit { policy_class,
                       group_id,
                       status,
                       window,
                       original_start,
                       neighbour_window,
                       members } = unit;

    chunk_members(members, max).into_iter()
                               .map(|chunk| DispatchUnit { policy_class,
                                                           group_id: group_id.clone(),
                                                           status,
                                                           window,
                                                           original_start,
                                                           neighbour_window,
                                                           members: chunk })
                               .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members(n: usize) -> Vec<DispatchMember> {
        (0..n).map(|i| DispatchMember { site: "S1".into(),
                                        meter_serial: format!("M{i}"),
                                        correlation_id: format!("CRL-{i}"),
                                        subscription_id: "sub-1".into(),
                                        neighbour_correlation_id: None })
              .collect()
    }

    fn sizes(chunks: &[Vec<DispatchMember>]) -> Vec<usize> {
        chunks.iter().map(|c| c.len()).collect()
    }

    #[test]
    fn small_batches_stay_whole() {
        assert_eq!(sizes(&chunk_members(members(1), 100)), vec![1]);
        assert_eq!(sizes(&chunk_members(members(100), 100)), vec![100]);
    }

    #[test]
    fn short_tail_folds_into_previous_chunk() {
        // 149 = 100 + 49; 49 < 50 se pliega -> un único trozo de 149.
        assert_eq!(sizes(&chunk_members(members(149), 100)), vec![149]);
        // 249 = 100 + 100 + 49 -> [100, 149].
        assert_eq!(sizes(&chunk_members(members(249), 100)), vec![100, 149]);
    }

    #[test]
    fn half_cap_tail_never_folds() {
        // Borde: 50 == 100/2 no se pliega.
        assert_eq!(sizes(&chunk_members(members(150), 100)), vec![100, 50]);
        assert_eq!(sizes(&chunk_members(members(250), 100)), vec![100, 100, 50]);
    }

    #[test]
    fn folded_chunk_never_exceeds_cap_and_a_half() {
        for n in 1..=400 {
            let chunks = chunk_members(members(n), 100);
            assert_eq!(chunks.iter().map(|c| c.len()).sum::<usize>(), n);
            for chunk in &chunks {
                assert!(chunk.len() <= 150, "chunk of {} for n={n}", chunk.len());
            }
        }
    }

    #[test]
    fn member_order_is_preserved_across_chunks() {
        let chunks = chunk_members(members(205), 100);
        let flattened: Vec<String> = chunks.into_iter()
                                           .flatten()
                                           .map(|m| m.correlation_id)
                                           .collect();
        let expected: Vec<String> = (0..205).map(|i| format!("CRL-{i}")).collect();
        assert_eq!(flattened, expected);
    }
}
