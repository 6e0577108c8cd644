use ratatui::layout::{Constraint, Direction, Layout, Rect};

/// Most displays the workspace lays out at once.
pub const MAX_DISPLAYS: usize = 25;

/// Split `area` into a near-square grid with one cell per display, filled row by row.
pub fn grid(area: Rect, count: usize) -> Vec<Rect> {
    if count == 0 {
        return Vec::new();
    }
    let cols = (count as f64).sqrt().ceil() as usize;
    let rows = count.div_ceil(cols);

    let row_areas = Layout::default()
        .direction(Direction::Vertical)
        .constraints(vec![Constraint::Ratio(1, rows as u32); rows])
        .split(area);

    row_areas
        .iter()
        .flat_map(|row| {
            Layout::default()
                .direction(Direction::Horizontal)
                .constraints(vec![Constraint::Ratio(1, cols as u32); cols])
                .split(*row)
                .to_vec()
        })
        .take(count)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_shapes() {
        struct TestCase {
            count: usize,
            expected_cells: usize,
            expected_first: Rect,
        }

        let area = Rect::new(0, 0, 120, 40);
        let tests = vec![
            TestCase {
                // TC0: single display fills the area
                count: 1,
                expected_cells: 1,
                expected_first: area,
            },
            TestCase {
                // TC1: four displays in 2x2
                count: 4,
                expected_cells: 4,
                expected_first: Rect::new(0, 0, 60, 20),
            },
            TestCase {
                // TC2: five displays in 3 columns, 2 rows
                count: 5,
                expected_cells: 5,
                expected_first: Rect::new(0, 0, 40, 20),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let cells = grid(area, test.count);
            assert_eq!(cells.len(), test.expected_cells, "TC{} failed", index);
            assert_eq!(cells[0], test.expected_first, "TC{} failed", index);
        }
    }

    #[test]
    fn test_grid_cells_do_not_overlap() {
        let cells = grid(Rect::new(0, 0, 100, 37), MAX_DISPLAYS);
        assert_eq!(cells.len(), MAX_DISPLAYS);
        for (i, a) in cells.iter().enumerate() {
            for b in &cells[i + 1..] {
                assert!(!a.intersects(*b));
            }
        }
    }

    #[test]
    fn test_grid_empty() {
        assert!(grid(Rect::new(0, 0, 10, 10), 0).is_empty());
    }
}
