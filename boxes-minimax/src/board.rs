//! The board and its pieces: dots, the edges between them and the boxes they close.
//!
//! A [Board] only records which edges are claimed. Who claimed them and the running score live
//! in [GameState](crate::GameState), and the search tracks turns with [Player].

use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
    sync::{Arc, OnceLock},
};

use itertools::Itertools;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The largest board size whose dot coordinates still fit in the packed [Dot] key
pub const MAX_PACKABLE_SIZE: u8 = u8::MAX - 1;

/// Everything that can go wrong while building or validating a [Board]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BoardError {
    /// The board size is zero or can't be packed into our [Dot] keys
    #[error("board size {0} is not supported")]
    InvalidSize(u8),
    /// The two dots are not one unit apart horizontally or vertically
    #[error("dots {0} and {1} are not adjacent")]
    NotAdjacent(Dot, Dot),
    /// The integer key does not decode to a canonical edge
    #[error("{0} is not a canonical edge key")]
    InvalidEdgeKey(u32),
    /// The edge lies outside of the board
    #[error("edge {edge} is not on a board of size {size}")]
    EdgeNotOnBoard {
        #[allow(missing_docs)]
        edge: Edge,
        #[allow(missing_docs)]
        size: u8,
    },
    /// The edge has already been claimed on this board
    #[error("edge {0} has already been claimed")]
    EdgeAlreadyClaimed(Edge),
    /// Text could not be parsed into a [Dot] or [Edge]
    #[error("could not parse '{0}'")]
    Parse(String),
}

/// A grid intersection, packed as `x << 8 | y`
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dot(u16);

impl Dot {
    /// Build a dot from its coordinates
    pub const fn new(x: u8, y: u8) -> Self {
        Self(((x as u16) << 8) | y as u16)
    }

    /// Rebuild a dot from its packed key
    pub const fn from_key(key: u16) -> Self {
        Self(key)
    }

    #[allow(missing_docs)]
    pub const fn x(self) -> u8 {
        (self.0 >> 8) as u8
    }

    #[allow(missing_docs)]
    pub const fn y(self) -> u8 {
        self.0 as u8
    }

    /// The packed key for this dot
    pub const fn key(self) -> u16 {
        self.0
    }

    const fn is_on_board(self, size: u8) -> bool {
        self.x() <= size && self.y() <= size
    }
}

impl fmt::Debug for Dot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.x(), self.y())
    }
}

impl fmt::Display for Dot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x(), self.y())
    }
}

impl FromStr for Dot {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim().trim_start_matches('(').trim_end_matches(')');
        let (x, y) = trimmed
            .split_once(',')
            .ok_or_else(|| BoardError::Parse(s.to_owned()))?;
        let x = x.trim().parse().map_err(|_| BoardError::Parse(s.to_owned()))?;
        let y = y.trim().parse().map_err(|_| BoardError::Parse(s.to_owned()))?;

        Ok(Dot::new(x, y))
    }
}

/// A claimable unit segment between two adjacent dots
///
/// Edges are canonical: the smaller dot always comes first, so the packed `lo << 16 | hi` key
/// is unique for every segment.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Edge(u32);

impl Edge {
    /// Build the edge between two dots, in either order
    pub fn new(a: Dot, b: Dot) -> Result<Self, BoardError> {
        if a.x().abs_diff(b.x()) + a.y().abs_diff(b.y()) != 1 {
            return Err(BoardError::NotAdjacent(a, b));
        }

        let (lo, hi) = if a < b { (a, b) } else { (b, a) };

        Ok(Self::from_ordered(lo, hi))
    }

    const fn from_ordered(lo: Dot, hi: Dot) -> Self {
        Self(((lo.key() as u32) << 16) | hi.key() as u32)
    }

    /// The edge from `(x, y)` to `(x + 1, y)`
    pub const fn horizontal(x: u8, y: u8) -> Self {
        Self::from_ordered(Dot::new(x, y), Dot::new(x + 1, y))
    }

    /// The edge from `(x, y)` to `(x, y + 1)`
    pub const fn vertical(x: u8, y: u8) -> Self {
        Self::from_ordered(Dot::new(x, y), Dot::new(x, y + 1))
    }

    /// Decode a packed key, rejecting anything that isn't a canonical edge
    pub fn from_key(key: u32) -> Result<Self, BoardError> {
        let lo = Dot::from_key((key >> 16) as u16);
        let hi = Dot::from_key(key as u16);

        match Edge::new(lo, hi) {
            Ok(edge) if edge.0 == key => Ok(edge),
            _ => Err(BoardError::InvalidEdgeKey(key)),
        }
    }

    /// The packed key for this edge
    pub const fn key(self) -> u32 {
        self.0
    }

    /// The smaller of the two dots
    pub const fn lo(self) -> Dot {
        Dot::from_key((self.0 >> 16) as u16)
    }

    /// The larger of the two dots
    pub const fn hi(self) -> Dot {
        Dot::from_key(self.0 as u16)
    }

    #[allow(missing_docs)]
    pub const fn is_horizontal(self) -> bool {
        self.lo().y() == self.hi().y()
    }

    /// Whether both endpoints fit on a board of the given size
    pub const fn is_on_board(self, size: u8) -> bool {
        self.hi().is_on_board(size)
    }

    /// The (at most two) boxes this edge borders on a board of the given size
    pub fn adjacent_boxes(self, size: u8) -> impl Iterator<Item = BoxCell> {
        let lo = self.lo();
        let (x, y) = (lo.x(), lo.y());

        let (first, second) = if self.is_horizontal() {
            (
                (y < size).then(|| BoxCell::new(x, y)),
                (y > 0).then(|| BoxCell::new(x, y - 1)),
            )
        } else {
            (
                (x < size).then(|| BoxCell::new(x, y)),
                (x > 0).then(|| BoxCell::new(x - 1, y)),
            )
        };

        first.into_iter().chain(second)
    }
}

impl TryFrom<u32> for Edge {
    type Error = BoardError;

    fn try_from(key: u32) -> Result<Self, Self::Error> {
        Edge::from_key(key)
    }
}

impl From<Edge> for u32 {
    fn from(edge: Edge) -> Self {
        edge.key()
    }
}

impl fmt::Debug for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Edge({:?}-{:?})", self.lo(), self.hi())
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.lo(), self.hi())
    }
}

impl FromStr for Edge {
    type Err = BoardError;

    /// Parses `x1,y1-x2,y2`, parentheses around the dots are optional
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (a, b) = s
            .split_once('-')
            .ok_or_else(|| BoardError::Parse(s.to_owned()))?;

        Edge::new(a.parse()?, b.parse()?)
    }
}

/// A unit cell, identified by its lower-left dot
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BoxCell(Dot);

impl BoxCell {
    #[allow(missing_docs)]
    pub const fn new(x: u8, y: u8) -> Self {
        Self(Dot::new(x, y))
    }

    /// The lower-left corner of this box
    pub const fn corner(self) -> Dot {
        self.0
    }

    /// The four edges bounding this box: bottom, top, left, right
    pub const fn edges(self) -> [Edge; 4] {
        let (x, y) = (self.0.x(), self.0.y());

        [
            Edge::horizontal(x, y),
            Edge::horizontal(x, y + 1),
            Edge::vertical(x, y),
            Edge::vertical(x + 1, y),
        ]
    }
}

/// All the dots, edges and boxes for one board size
///
/// These never change for a given size so they are computed once and shared through
/// [Geometry::for_size]
#[derive(Debug)]
pub struct Geometry {
    size: u8,
    dots: Vec<Dot>,
    edges: Vec<Edge>,
    boxes: Vec<BoxCell>,
}

static GEOMETRIES: OnceLock<RwLock<HashMap<u8, Arc<Geometry>>>> = OnceLock::new();

impl Geometry {
    /// Look up the geometry for a board size, building it the first time it is asked for
    pub fn for_size(size: u8) -> Result<Arc<Geometry>, BoardError> {
        if size == 0 || size > MAX_PACKABLE_SIZE {
            return Err(BoardError::InvalidSize(size));
        }

        let table = GEOMETRIES.get_or_init(Default::default);

        if let Some(geometry) = table.read().get(&size) {
            return Ok(geometry.clone());
        }

        let mut table = table.write();
        let geometry = table
            .entry(size)
            .or_insert_with(|| Arc::new(Geometry::build(size)));

        Ok(geometry.clone())
    }

    fn build(size: u8) -> Self {
        let dots = (0..=size)
            .cartesian_product(0..=size)
            .map(|(x, y)| Dot::new(x, y))
            .collect();

        let edges = (0..=size)
            .cartesian_product(0..=size)
            .flat_map(|(x, y)| {
                let horizontal = (x < size).then(|| Edge::horizontal(x, y));
                let vertical = (y < size).then(|| Edge::vertical(x, y));

                horizontal.into_iter().chain(vertical)
            })
            .sorted()
            .collect();

        let boxes = (0..size)
            .cartesian_product(0..size)
            .map(|(x, y)| BoxCell::new(x, y))
            .collect();

        Self {
            size,
            dots,
            edges,
            boxes,
        }
    }

    /// Number of boxes along one side
    pub fn size(&self) -> u8 {
        self.size
    }

    #[allow(missing_docs)]
    pub fn dots(&self) -> &[Dot] {
        &self.dots
    }

    /// Every edge on the board, in ascending key order
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    #[allow(missing_docs)]
    pub fn boxes(&self) -> &[BoxCell] {
        &self.boxes
    }

    /// `2 * n * (n + 1)` for a board of size `n`
    pub fn total_edges(&self) -> usize {
        self.edges.len()
    }
}

/// A set of claimed edges on a board of a fixed size
///
/// Boards are values: [Board::append] and [Board::claim] return a new board and leave `self`
/// untouched, which lets concurrent search branches share a parent board freely.
#[derive(Clone)]
pub struct Board {
    geometry: Arc<Geometry>,
    edges: BTreeSet<Edge>,
}

#[derive(Serialize, Deserialize)]
struct BoardSnapshot {
    size: u8,
    edges: Vec<Edge>,
}

impl Board {
    /// An empty board with `size` boxes along each side
    pub fn new(size: u8) -> Result<Self, BoardError> {
        Ok(Self {
            geometry: Geometry::for_size(size)?,
            edges: BTreeSet::new(),
        })
    }

    /// A board with the given edges already claimed
    ///
    /// Fails if any edge is off the board or appears more than once
    pub fn from_edges(size: u8, edges: impl IntoIterator<Item = Edge>) -> Result<Self, BoardError> {
        let mut board = Self::new(size)?;

        for edge in edges {
            board.validate(edge)?;
            board.edges.insert(edge);
        }

        Ok(board)
    }

    fn validate(&self, edge: Edge) -> Result<(), BoardError> {
        if !edge.is_on_board(self.size()) {
            return Err(BoardError::EdgeNotOnBoard {
                edge,
                size: self.size(),
            });
        }

        if self.edges.contains(&edge) {
            return Err(BoardError::EdgeAlreadyClaimed(edge));
        }

        Ok(())
    }

    /// Number of boxes along one side
    pub fn size(&self) -> u8 {
        self.geometry.size()
    }

    #[allow(missing_docs)]
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// The claimed edges, in ascending key order
    pub fn edges(&self) -> &BTreeSet<Edge> {
        &self.edges
    }

    #[allow(missing_docs)]
    pub fn contains(&self, edge: Edge) -> bool {
        self.edges.contains(&edge)
    }

    /// Number of edges claimed so far, which is also the step of the game
    pub fn step(&self) -> usize {
        self.edges.len()
    }

    /// Whether every edge has been claimed
    pub fn is_full(&self) -> bool {
        self.edges.len() == self.geometry.total_edges()
    }

    /// All unclaimed edges, in ascending key order
    pub fn free_edges(&self) -> Vec<Edge> {
        self.geometry
            .edges()
            .iter()
            .filter(|edge| !self.edges.contains(edge))
            .copied()
            .collect()
    }

    /// How many of the four edges of `cell` are claimed
    pub fn edges_in_box(&self, cell: BoxCell) -> u8 {
        cell.edges()
            .iter()
            .filter(|edge| self.edges.contains(edge))
            .count() as u8
    }

    /// The boxes that claiming `edge` would complete
    ///
    /// Empty when the edge is already claimed, off the board, or completes nothing
    pub fn obtains_boxes(&self, edge: Edge) -> Vec<BoxCell> {
        if self.edges.contains(&edge) || !edge.is_on_board(self.size()) {
            return vec![];
        }

        edge.adjacent_boxes(self.size())
            .filter(|cell| self.edges_in_box(*cell) == 3)
            .collect()
    }

    /// The number of boxes claiming `edge` would complete, `0..=2`
    pub fn score_of(&self, edge: Edge) -> u8 {
        self.obtains_boxes(edge).len() as u8
    }

    /// Number of boxes with all four edges claimed
    pub fn completed_boxes(&self) -> usize {
        self.geometry
            .boxes()
            .iter()
            .filter(|cell| self.edges_in_box(**cell) == 4)
            .count()
    }

    /// A new board with `edge` claimed as well
    ///
    /// Appending an edge that is already claimed or that is off the board returns an
    /// unchanged copy; use [Board::claim] when the edge comes from outside and needs checking.
    pub fn append(&self, edge: Edge) -> Board {
        debug_assert!(edge.is_on_board(self.size()), "{edge} is off the board");

        let mut next = self.clone();
        if edge.is_on_board(self.size()) {
            next.edges.insert(edge);
        }
        next
    }

    /// Like [Board::append] but rejects edges that are already claimed or off the board
    pub fn claim(&self, edge: Edge) -> Result<Board, BoardError> {
        self.validate(edge)?;

        Ok(self.append(edge))
    }
}

impl PartialEq for Board {
    fn eq(&self, other: &Self) -> bool {
        self.size() == other.size() && self.edges == other.edges
    }
}

impl Eq for Board {}

impl Hash for Board {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.size().hash(state);
        self.edges.hash(state);
    }
}

impl fmt::Debug for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Board")
            .field("size", &self.size())
            .field("edges", &self.edges)
            .finish()
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let size = self.size();

        for y in (0..=size).rev() {
            for x in 0..=size {
                write!(f, "+")?;
                if x < size {
                    let claimed = self.contains(Edge::horizontal(x, y));
                    write!(f, "{}", if claimed { "---" } else { "   " })?;
                }
            }
            writeln!(f)?;

            if y == 0 {
                break;
            }

            for x in 0..=size {
                let claimed = self.contains(Edge::vertical(x, y - 1));
                write!(f, "{}", if claimed { "|" } else { " " })?;
                if x < size {
                    let complete = self.edges_in_box(BoxCell::new(x, y - 1)) == 4;
                    write!(f, "{}", if complete { " # " } else { "   " })?;
                }
            }
            writeln!(f)?;
        }

        Ok(())
    }
}

impl From<Board> for BoardSnapshot {
    fn from(board: Board) -> Self {
        Self {
            size: board.size(),
            edges: board.edges.into_iter().collect(),
        }
    }
}

impl TryFrom<BoardSnapshot> for Board {
    type Error = BoardError;

    fn try_from(snapshot: BoardSnapshot) -> Result<Self, Self::Error> {
        Board::from_edges(snapshot.size, snapshot.edges)
    }
}

impl Serialize for Board {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        BoardSnapshot::from(self.clone()).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Board {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let snapshot = BoardSnapshot::deserialize(deserializer)?;

        Board::try_from(snapshot).map_err(serde::de::Error::custom)
    }
}

/// The two players. Completing a box keeps the turn, anything else passes it on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Player {
    /// Moves first, and is the maximizing player during search
    One,
    /// The minimizing player during search
    Two,
}

impl Player {
    /// The other player
    pub const fn next(self) -> Self {
        match self {
            Player::One => Player::Two,
            Player::Two => Player::One,
        }
    }

    /// Who moves after this player claims an edge worth `score` boxes
    pub const fn after(self, score: u8) -> Self {
        if score == 0 {
            self.next()
        } else {
            self
        }
    }

    /// `+1` for [Player::One] and `-1` for [Player::Two]
    pub const fn sign(self) -> f64 {
        match self {
            Player::One => 1.0,
            Player::Two => -1.0,
        }
    }

    /// `0` for [Player::One] and `1` for [Player::Two], for indexing per-player arrays
    pub const fn index(self) -> usize {
        match self {
            Player::One => 0,
            Player::Two => 1,
        }
    }
}

/// Claiming `edge` on `board`
#[derive(Debug, Clone, Copy)]
pub struct Move<'a> {
    #[allow(missing_docs)]
    pub board: &'a Board,
    #[allow(missing_docs)]
    pub edge: Edge,
}

impl<'a> Move<'a> {
    #[allow(missing_docs)]
    pub fn new(board: &'a Board, edge: Edge) -> Self {
        Self { board, edge }
    }

    /// The number of boxes this move completes
    pub fn score(&self) -> u8 {
        self.board.score_of(self.edge)
    }

    /// True iff the move completes nothing, which hands the turn to the other player
    pub fn will_change_turn(&self) -> bool {
        self.score() == 0
    }

    /// The board after this move
    pub fn apply(&self) -> Board {
        self.board.append(self.edge)
    }
}
