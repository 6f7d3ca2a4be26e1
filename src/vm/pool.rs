//! Dice-pool transforms: sorting, keep/discard selection, success counting
//! and rerolls. Pools are plain numbers in roll order.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compare {
    Greater,
    Less,
    Equal,
}

impl Compare {
    pub fn test(self, x: f64, threshold: f64) -> bool {
        match self {
            Compare::Greater => x > threshold,
            Compare::Less => x < threshold,
            Compare::Equal => x == threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Select {
    KeepHigh,
    KeepLow,
    KeepFront,
    KeepRear,
    DiscardHigh,
    DiscardLow,
    DiscardFront,
    DiscardRear,
}

pub fn sort(pool: &mut [f64], descending: bool) {
    if descending {
        pool.sort_by(|a, b| b.total_cmp(a));
    } else {
        pool.sort_by(|a, b| a.total_cmp(b));
    }
}

/// Clamp a requested selection size to `[0, len]`, truncating fractions.
pub fn clamp_count(n: f64, len: usize) -> usize {
    if n.is_nan() || n <= 0.0 {
        0
    } else {
        (n.trunc() as usize).min(len)
    }
}

/// Apply a keep/discard selection. The result stays in roll order.
///
/// High/low selections rank a copy of the pool (highest first, ties by roll
/// position); the low ranking is that order reversed, so `keep_high(n)` and
/// `discard_low(len - n)` pick exactly the same dice.
pub fn select(pool: &[f64], mode: Select, n: usize) -> Vec<f64> {
    let len = pool.len();
    let n = n.min(len);
    match mode {
        Select::KeepFront => pool[..n].to_vec(),
        Select::KeepRear => pool[len - n..].to_vec(),
        Select::DiscardFront => pool[n..].to_vec(),
        Select::DiscardRear => pool[..len - n].to_vec(),
        Select::KeepHigh | Select::KeepLow | Select::DiscardHigh | Select::DiscardLow => {
            let mut ranked: Vec<usize> = (0..len).collect();
            ranked.sort_by(|&a, &b| pool[b].total_cmp(&pool[a]));
            let chosen = match mode {
                Select::KeepHigh => &ranked[..n],
                Select::KeepLow => &ranked[len - n..],
                Select::DiscardHigh => &ranked[n..],
                _ => &ranked[..len - n],
            };
            let mut keep = vec![false; len];
            for &i in chosen {
                keep[i] = true;
            }
            pool.iter().zip(keep).filter(|(_, k)| *k).map(|(x, _)| *x).collect()
        }
    }
}

pub fn count_matching(pool: &[f64], cmp: Compare, threshold: f64) -> usize {
    pool.iter().filter(|&&x| cmp.test(x, threshold)).count()
}

/// Reroll every die matching `cmp` until none match, at most `max_passes`
/// times. Returns false when dice still match after the last pass.
pub fn reroll_until(
    pool: &mut [f64],
    cmp: Compare,
    threshold: f64,
    max_passes: usize,
    mut draw: impl FnMut() -> f64,
) -> bool {
    for _ in 0..max_passes {
        let mut rerolled = false;
        for x in pool.iter_mut().filter(|x| cmp.test(**x, threshold)) {
            *x = draw();
            rerolled = true;
        }
        if !rerolled {
            return true;
        }
    }
    count_matching(pool, cmp, threshold) == 0
}

/// Reroll each matching die exactly once.
pub fn reroll_once(pool: &mut [f64], cmp: Compare, threshold: f64, mut draw: impl FnMut() -> f64) {
    for x in pool.iter_mut().filter(|x| cmp.test(**x, threshold)) {
        *x = draw();
    }
}
