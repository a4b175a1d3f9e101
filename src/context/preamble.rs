//! The system preamble: a fixed instruction set plus conditional segments
//! for canvas tooling and hidden canvas-update messages.

/// Instructions sent on every turn.
const BASE_INSTRUCTIONS: &str = "\
You are the assistant inside a branching research workspace. The \
conversation you see is one branch of a larger project; earlier branches \
may have been merged in, appearing as merge summaries. Treat merge \
summaries as faithful accounts of work done on other branches. Answer \
the user directly and keep continuity with the visible history.";

/// Appended when the canvas tool surface is enabled for this turn.
const CANVAS_TOOLS_SEGMENT: &str = "\
A shared canvas document accompanies this conversation. When asked to \
update the canvas, produce the full revised document rather than a \
description of the change.";

/// Appended when the window contains hidden canvas-update messages.
const HIDDEN_UPDATES_SEGMENT: &str = "\
Some user messages in this conversation were automated canvas updates \
and are not shown verbatim. Treat the canvas state they describe as \
authoritative even where the visible discussion lags behind it.";

/// Assemble the preamble for one turn.
pub fn system_preamble(canvas_tools_available: bool, has_hidden_updates: bool) -> String {
    let mut out = String::from(BASE_INSTRUCTIONS);
    if canvas_tools_available {
        out.push_str("\n\n");
        out.push_str(CANVAS_TOOLS_SEGMENT);
    }
    if has_hidden_updates {
        out.push_str("\n\n");
        out.push_str(HIDDEN_UPDATES_SEGMENT);
    }
    out
}
