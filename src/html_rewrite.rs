use std::pin::Pin;
use std::task::Poll::{Pending, Ready};

use bytes::{BufMut, Bytes, BytesMut};
use hyper::HeaderMap;
use hyper::body::{Body, Frame, SizeHint};
use hyper::header::{CONTENT_ENCODING, CONTENT_TYPE};
use pin_project::pin_project;

use crate::geo::GeoAttributes;
use crate::profiles::Profile;

/// Everything the transformer may insert for one request, resolved up front
/// so the scanner itself stays a pure byte machine.
#[derive(Debug)]
pub(crate) struct RewritePlan {
    /// Injected directly after the `<head ...>` open tag.
    head_injection: String,
    /// Appended directly before `</body>`, when set.
    body_fragment: Option<String>,
    /// Replacement content for `<title>`/`<h1>`, when set.
    rebrand: Option<RebrandText>,
}

#[derive(Debug)]
struct RebrandText {
    title: String,
    heading: String,
}

impl RewritePlan {
    #[must_use]
    pub(crate) fn for_request(
        profile: &Profile,
        client_host: &str,
        path: &str,
        geo: GeoAttributes<'_>,
        mirror_host: &str,
    ) -> Self {
        let branding = &profile.branding;
        let head_injection = format!(
            "{}{}{}",
            branding.head_extra, branding.favicon_link, branding.meta_tags
        );

        let body_fragment = profile
            .info_fragment_path
            .filter(|index_path| *index_path == path)
            .map(|_| {
                format!(
                    "<div style=\"position: relative; bottom: 5px;font-size: 16px; text-align: left;\">\
                     <p>Country: {}, Colo: {}, Mirror: {mirror_host}</p></div>",
                    geo.country.unwrap_or("unknown"),
                    geo.colo.unwrap_or("unknown"),
                )
            });

        let rebrand = profile
            .rebrand
            .as_ref()
            .filter(|r| path == "/" && client_host == r.canonical_host)
            .map(|r| RebrandText {
                title: format!("{}{}", r.prefix, r.title_suffix),
                heading: format!("{}{}", r.prefix, r.heading_suffix),
            });

        Self {
            head_injection,
            body_fragment,
            rebrand,
        }
    }

    #[cfg(test)]
    fn bare(
        head_injection: &str,
        body_fragment: Option<&str>,
        rebrand: Option<(&str, &str)>,
    ) -> Self {
        Self {
            head_injection: head_injection.to_string(),
            body_fragment: body_fragment.map(str::to_string),
            rebrand: rebrand.map(|(title, heading)| RebrandText {
                title: title.to_string(),
                heading: heading.to_string(),
            }),
        }
    }
}

/// The transform gate: only uncompressed HTML is rewritable. A missing
/// `Content-Type`, a non-HTML type, or a compressed stream all mean the
/// body passes through untouched instead of failing the request.
#[must_use]
pub(crate) fn is_rewritable_html(headers: &HeaderMap) -> bool {
    let is_html = headers
        .get(CONTENT_TYPE)
        .and_then(|val| val.to_str().ok())
        .is_some_and(|ct| ct.to_ascii_lowercase().contains("text/html"));
    if !is_html {
        return false;
    }

    match headers.get(CONTENT_ENCODING).and_then(|val| val.to_str().ok()) {
        None => true,
        Some(encoding) => encoding.eq_ignore_ascii_case("identity"),
    }
}

/// Elements the scanner cares about beyond plain tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Elem {
    Script,
    Style,
    Title,
    H1,
}

impl Elem {
    const fn name(self) -> &'static [u8] {
        match self {
            Self::Script => b"script",
            Self::Style => b"style",
            Self::Title => b"title",
            Self::H1 => b"h1",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScanState {
    /// Copying text, looking for `<`.
    Text,
    /// Saw `<`, deciding whether a tag starts here.
    PendingLt,
    /// Accumulating a tag into the buffer, up to `>`.
    Tag,
    /// Inside `<!-- -->`, copying verbatim.
    Comment,
    /// Inside a raw-text element, copying verbatim; anchors never fire here.
    RawText(Elem),
    /// Accumulating a potential raw-text closing tag.
    RawTag(Elem),
    /// Dropping replaced element content.
    SkipInner(Elem),
    /// Accumulating a tag inside replaced content.
    SkipTag(Elem),
}

/// Incremental scan-and-patch over the structural anchors of an HTML
/// stream: the head open tag, the body close tag, and (when rebranding)
/// the first title/h1 element. Everything else is copied byte-for-byte.
///
/// The scanner holds at most one partial tag between calls, so memory use
/// is bounded regardless of document size, and anchors split across chunk
/// boundaries are still recognized.
#[derive(Debug)]
pub(crate) struct HtmlScanner {
    plan: RewritePlan,
    state: ScanState,
    tag_buf: Vec<u8>,
    comment_dashes: u8,
    head_done: bool,
    fragment_done: bool,
    title_done: bool,
    heading_done: bool,
}

/// Tags longer than this cannot be anchors; they are flushed verbatim.
const MAX_TAG_LEN: usize = 1024;

impl HtmlScanner {
    #[must_use]
    pub(crate) fn new(plan: RewritePlan) -> Self {
        Self {
            plan,
            state: ScanState::Text,
            tag_buf: Vec::new(),
            comment_dashes: 0,
            head_done: false,
            fragment_done: false,
            title_done: false,
            heading_done: false,
        }
    }

    pub(crate) fn process(&mut self, input: &[u8], out: &mut BytesMut) {
        let mut i = 0;

        while i < input.len() {
            match self.state {
                ScanState::Text => match input[i..].iter().position(|&b| b == b'<') {
                    Some(pos) => {
                        out.extend_from_slice(&input[i..i + pos]);
                        self.state = ScanState::PendingLt;
                        i += pos + 1;
                    }
                    None => {
                        out.extend_from_slice(&input[i..]);
                        i = input.len();
                    }
                },
                ScanState::PendingLt => {
                    let b = input[i];
                    if b == b'/' || b == b'!' || b.is_ascii_alphabetic() {
                        self.tag_buf.clear();
                        self.tag_buf.push(b'<');
                        self.state = ScanState::Tag;
                    } else {
                        /* stray `<` in text, e.g. "1 < 2" */
                        out.put_u8(b'<');
                        self.state = ScanState::Text;
                    }
                }
                ScanState::Tag => {
                    let b = input[i];
                    self.tag_buf.push(b);
                    i += 1;

                    if self.tag_buf == b"<!--" {
                        out.extend_from_slice(&self.tag_buf);
                        self.tag_buf.clear();
                        self.comment_dashes = 0;
                        self.state = ScanState::Comment;
                    } else if b == b'>' {
                        self.on_tag_complete(out);
                    } else if self.tag_buf.len() > MAX_TAG_LEN {
                        out.extend_from_slice(&self.tag_buf);
                        self.tag_buf.clear();
                        self.state = ScanState::Text;
                    }
                }
                ScanState::Comment => {
                    let b = input[i];
                    out.put_u8(b);
                    i += 1;

                    if b == b'-' {
                        self.comment_dashes = self.comment_dashes.saturating_add(1);
                    } else if b == b'>' && self.comment_dashes >= 2 {
                        self.state = ScanState::Text;
                    } else {
                        self.comment_dashes = 0;
                    }
                }
                ScanState::RawText(elem) => match input[i..].iter().position(|&b| b == b'<') {
                    Some(pos) => {
                        out.extend_from_slice(&input[i..i + pos]);
                        self.tag_buf.clear();
                        self.tag_buf.push(b'<');
                        self.state = ScanState::RawTag(elem);
                        i += pos + 1;
                    }
                    None => {
                        out.extend_from_slice(&input[i..]);
                        i = input.len();
                    }
                },
                ScanState::RawTag(elem) => {
                    let b = input[i];
                    self.tag_buf.push(b);
                    i += 1;

                    if b == b'>' {
                        let is_closer = matches!(
                            tag_name(&self.tag_buf),
                            Some((name, true)) if name.eq_ignore_ascii_case(elem.name())
                        );
                        out.extend_from_slice(&self.tag_buf);
                        self.tag_buf.clear();
                        self.state = if is_closer {
                            ScanState::Text
                        } else {
                            ScanState::RawText(elem)
                        };
                    } else if self.tag_buf.len() > MAX_TAG_LEN {
                        out.extend_from_slice(&self.tag_buf);
                        self.tag_buf.clear();
                        self.state = ScanState::RawText(elem);
                    }
                }
                ScanState::SkipInner(elem) => {
                    match input[i..].iter().position(|&b| b == b'<') {
                        Some(pos) => {
                            self.tag_buf.clear();
                            self.tag_buf.push(b'<');
                            self.state = ScanState::SkipTag(elem);
                            i += pos + 1;
                        }
                        None => i = input.len(),
                    }
                }
                ScanState::SkipTag(elem) => {
                    let b = input[i];
                    self.tag_buf.push(b);
                    i += 1;

                    if b == b'>' {
                        let is_closer = matches!(
                            tag_name(&self.tag_buf),
                            Some((name, true)) if name.eq_ignore_ascii_case(elem.name())
                        );
                        if is_closer {
                            let replacement = match elem {
                                Elem::Title => self.plan.rebrand.as_ref().map(|r| r.title.as_str()),
                                Elem::H1 => self.plan.rebrand.as_ref().map(|r| r.heading.as_str()),
                                Elem::Script | Elem::Style => None,
                            };
                            if let Some(text) = replacement {
                                out.extend_from_slice(text.as_bytes());
                            }
                            out.extend_from_slice(&self.tag_buf);
                            self.tag_buf.clear();
                            self.state = ScanState::Text;
                        } else {
                            /* inner markup is part of the replaced content */
                            self.tag_buf.clear();
                            self.state = ScanState::SkipInner(elem);
                        }
                    } else if self.tag_buf.len() > MAX_TAG_LEN {
                        self.tag_buf.clear();
                        self.state = ScanState::SkipInner(elem);
                    }
                }
            }
        }
    }

    /// Flushes whatever an unterminated document left in flight.
    pub(crate) fn finish(&mut self, out: &mut BytesMut) {
        match self.state {
            ScanState::PendingLt => out.put_u8(b'<'),
            ScanState::Tag | ScanState::RawTag(_) => out.extend_from_slice(&self.tag_buf),
            ScanState::Text
            | ScanState::Comment
            | ScanState::RawText(_)
            | ScanState::SkipInner(_)
            | ScanState::SkipTag(_) => (),
        }
        self.tag_buf.clear();
        self.state = ScanState::Text;
    }

    fn on_tag_complete(&mut self, out: &mut BytesMut) {
        enum TagAction {
            Plain,
            HeadOpen,
            BodyClose,
            EnterRaw(Elem),
            EnterSkip(Elem),
        }

        let self_closing = self.tag_buf.ends_with(b"/>");
        let rebranding = self.plan.rebrand.is_some();

        let action = match tag_name(&self.tag_buf) {
            Some((name, true))
                if name.eq_ignore_ascii_case(b"body")
                    && !self.fragment_done
                    && self.plan.body_fragment.is_some() =>
            {
                TagAction::BodyClose
            }
            Some((name, false)) if name.eq_ignore_ascii_case(b"head") && !self.head_done => {
                TagAction::HeadOpen
            }
            Some((name, false)) if name.eq_ignore_ascii_case(b"script") && !self_closing => {
                TagAction::EnterRaw(Elem::Script)
            }
            Some((name, false)) if name.eq_ignore_ascii_case(b"style") && !self_closing => {
                TagAction::EnterRaw(Elem::Style)
            }
            Some((name, false))
                if name.eq_ignore_ascii_case(b"title")
                    && !self_closing
                    && !self.title_done
                    && rebranding =>
            {
                TagAction::EnterSkip(Elem::Title)
            }
            Some((name, false))
                if name.eq_ignore_ascii_case(b"h1")
                    && !self_closing
                    && !self.heading_done
                    && rebranding =>
            {
                TagAction::EnterSkip(Elem::H1)
            }
            _ => TagAction::Plain,
        };

        self.state = ScanState::Text;

        match action {
            TagAction::Plain => out.extend_from_slice(&self.tag_buf),
            TagAction::HeadOpen => {
                out.extend_from_slice(&self.tag_buf);
                out.extend_from_slice(self.plan.head_injection.as_bytes());
                self.head_done = true;
            }
            TagAction::BodyClose => {
                let fragment = self
                    .plan
                    .body_fragment
                    .as_deref()
                    .expect("checked during classification");
                out.extend_from_slice(fragment.as_bytes());
                out.extend_from_slice(&self.tag_buf);
                self.fragment_done = true;
            }
            TagAction::EnterRaw(elem) => {
                out.extend_from_slice(&self.tag_buf);
                self.state = ScanState::RawText(elem);
            }
            TagAction::EnterSkip(elem) => {
                out.extend_from_slice(&self.tag_buf);
                match elem {
                    Elem::Title => self.title_done = true,
                    Elem::H1 => self.heading_done = true,
                    Elem::Script | Elem::Style => unreachable!("skip anchors are title/h1"),
                }
                self.state = ScanState::SkipInner(elem);
            }
        }

        self.tag_buf.clear();
    }
}

/// Splits a complete tag buffer (`<...>`) into its element name and whether
/// it is a closing tag. Returns `None` when no well-formed name follows the
/// bracket, e.g. `<!doctype>` or `<3>`.
fn tag_name(tag: &[u8]) -> Option<(&[u8], bool)> {
    let inner = tag.strip_prefix(b"<")?;
    let (inner, closing) = match inner.strip_prefix(b"/") {
        Some(rest) => (rest, true),
        None => (inner, false),
    };

    let name_len = inner
        .iter()
        .position(|b| !b.is_ascii_alphanumeric())
        .unwrap_or(inner.len());
    if name_len == 0 {
        return None;
    }

    /* the name must end at whitespace, `/` or `>`, so `<header>` is not `<head>` */
    match inner.get(name_len) {
        Some(b' ' | b'\t' | b'\r' | b'\n' | b'/' | b'>') => Some((&inner[..name_len], closing)),
        _ => None,
    }
}

/// Streaming body wrapper applying an [`HtmlScanner`] to every data frame.
/// Frames pass through as they arrive; nothing is buffered beyond the
/// scanner's partial-tag tail, so backpressure and cancellation behave as
/// for the raw upstream body.
#[pin_project]
pub(crate) struct HtmlRewriteBody<B> {
    #[pin]
    inner: B,
    scanner: HtmlScanner,
    finished: bool,
}

impl<B> HtmlRewriteBody<B> {
    #[must_use]
    pub(crate) fn new(inner: B, plan: RewritePlan) -> Self {
        Self {
            inner,
            scanner: HtmlScanner::new(plan),
            finished: false,
        }
    }
}

impl<B> Body for HtmlRewriteBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        loop {
            if *this.finished {
                return Ready(None);
            }

            match this.inner.as_mut().poll_frame(cx) {
                Ready(Some(Ok(frame))) => match frame.into_data() {
                    Ok(data) => {
                        let mut out = BytesMut::with_capacity(data.len());
                        this.scanner.process(&data, &mut out);
                        if out.is_empty() {
                            /* chunk fully absorbed (partial tag or replaced content) */
                            continue;
                        }
                        return Ready(Some(Ok(Frame::data(out.freeze()))));
                    }
                    Err(other) => return Ready(Some(Ok(other))),
                },
                Ready(Some(Err(err))) => return Ready(Some(Err(err))),
                Ready(None) => {
                    *this.finished = true;
                    let mut out = BytesMut::new();
                    this.scanner.finish(&mut out);
                    if out.is_empty() {
                        return Ready(None);
                    }
                    return Ready(Some(Ok(Frame::data(out.freeze()))));
                }
                Pending => return Pending,
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.finished
    }

    fn size_hint(&self) -> SizeHint {
        /* insertions change the length; never advertise the upstream size */
        SizeHint::default()
    }
}
