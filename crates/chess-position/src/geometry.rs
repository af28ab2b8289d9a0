//! Mapping between screen pixels and board squares.
//!
//! Kept free of any windowing types so the click path can be tested without
//! a display. Pixel `(0, 0)` is the top-left corner of the board.

use shakmaty::Square;

/// Which side is drawn at the bottom of the board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    /// White at the bottom, a1 in the bottom-left corner.
    #[default]
    WhiteBottom,
    /// Black at the bottom, h8 in the bottom-left corner.
    BlackBottom,
}

/// Size and orientation of a drawn board.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoardGeometry {
    /// Edge length of one square in pixels.
    pub square_size: f64,
    pub orientation: Orientation,
}

impl BoardGeometry {
    /// Creates a geometry for a board `board_size` pixels wide.
    pub fn new(board_size: f64) -> Self {
        BoardGeometry {
            square_size: board_size / 8.0,
            orientation: Orientation::WhiteBottom,
        }
    }

    /// Returns the same geometry drawn from the other side.
    pub fn flipped(self) -> Self {
        let orientation = match self.orientation {
            Orientation::WhiteBottom => Orientation::BlackBottom,
            Orientation::BlackBottom => Orientation::WhiteBottom,
        };
        BoardGeometry {
            orientation,
            ..self
        }
    }

    /// Returns the square under pixel `(x, y)`, or `None` outside the board.
    pub fn square_at(&self, x: f64, y: f64) -> Option<Square> {
        if self.square_size <= 0.0
            || !self.square_size.is_finite()
            || !x.is_finite()
            || !y.is_finite()
        {
            return None;
        }
        let col = (x / self.square_size).floor();
        let row = (y / self.square_size).floor();
        if !(0.0..8.0).contains(&col) || !(0.0..8.0).contains(&row) {
            return None;
        }
        let (col, row) = (col as u32, row as u32);
        let (file, rank) = match self.orientation {
            Orientation::WhiteBottom => (col, 7 - row),
            Orientation::BlackBottom => (7 - col, row),
        };
        Some(Square::new(rank * 8 + file))
    }

    /// Returns the top-left pixel of `square`.
    pub fn square_origin(&self, square: Square) -> (f64, f64) {
        let index = square as u32;
        let (file, rank) = (index % 8, index / 8);
        let (col, row) = match self.orientation {
            Orientation::WhiteBottom => (file, 7 - rank),
            Orientation::BlackBottom => (7 - file, rank),
        };
        (
            f64::from(col) * self.square_size,
            f64::from(row) * self.square_size,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn corners_white_bottom() {
        let g = BoardGeometry::new(500.0);
        assert_eq!(g.square_at(0.0, 0.0), Some(Square::A8));
        assert_eq!(g.square_at(499.0, 499.0), Some(Square::H1));
        assert_eq!(g.square_at(10.0, 490.0), Some(Square::A1));
        assert_eq!(g.square_at(280.0, 400.0), Some(Square::E2));
    }

    #[test]
    fn corners_black_bottom() {
        let g = BoardGeometry::new(400.0).flipped();
        assert_eq!(g.square_at(0.0, 0.0), Some(Square::H1));
        assert_eq!(g.square_at(399.0, 399.0), Some(Square::A8));
    }

    #[test]
    fn outside_the_board() {
        let g = BoardGeometry::new(500.0);
        assert_eq!(g.square_at(-1.0, 10.0), None);
        assert_eq!(g.square_at(10.0, 500.0), None);
        assert_eq!(g.square_at(550.0, 10.0), None);
        assert_eq!(g.square_at(f64::NAN, 10.0), None);
        assert_eq!(BoardGeometry::new(0.0).square_at(0.0, 0.0), None);
    }

    #[test]
    fn origin_of_e2() {
        let g = BoardGeometry::new(800.0);
        assert_eq!(g.square_origin(Square::E2), (400.0, 600.0));
    }

    proptest! {
        #[test]
        fn centre_of_every_square_maps_back(index in 0u32..64, size in 80.0f64..2000.0, flip: bool) {
            let mut g = BoardGeometry::new(size);
            if flip {
                g = g.flipped();
            }
            let square = Square::new(index);
            let (x, y) = g.square_origin(square);
            let half = g.square_size / 2.0;
            prop_assert_eq!(g.square_at(x + half, y + half), Some(square));
        }
    }
}
