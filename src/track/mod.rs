mod adjacency;
mod locate;
mod ray;

pub use adjacency::AdjacencyIndex;
pub use locate::find_cell;
pub use ray::{track_out_cell, traverse, Crossing, Segment, Traverse};
