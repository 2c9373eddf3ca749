//! Word geometry extracted from the engine's document-structure export

use crate::engine::TextNode;

/// Word bounding box in top-left-origin page coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

/// One word of page text with its bounding box.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Word {
    pub text: String,
    pub rect: TextRect,
}

/// Walk the export tree depth-first, collecting words in document order.
///
/// The engine reports boxes with a bottom-left origin; `page_height` flips
/// them to the top-left origin used by everything downstream.
pub(crate) fn collect_words(node: &TextNode, page_height: i32, out: &mut Vec<Word>) {
    match node {
        TextNode::Branch(children) => {
            for child in children {
                collect_words(child, page_height, out);
            }
        }
        TextNode::Word {
            text,
            x_min,
            y_min,
            x_max,
            y_max,
        } => {
            out.push(Word {
                text: text.clone(),
                rect: TextRect {
                    left: *x_min,
                    top: page_height - y_max,
                    right: *x_max,
                    bottom: page_height - y_min,
                },
            });
        }
    }
}
