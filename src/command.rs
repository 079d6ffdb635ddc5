use futures::{
    FutureExt, Stream, StreamExt,
    stream::{self, BoxStream, select_all},
};

/// A deferred side effect that yields messages.
///
/// Commands are how mutations and cache invalidations plug into an
/// Elm-architecture host: `update` returns a `Command`, and the host drains
/// [`Command::into_stream`] and feeds every message back into `update`.
///
/// # Examples
///
/// ```
/// use sprig::command::Command;
///
/// enum Message {
///     GotResult(i32),
/// }
///
/// let cmd = Command::perform(async { 42 }, Message::GotResult);
/// ```
pub struct Command<Msg: Send + 'static> {
    pub(crate) stream: Option<BoxStream<'static, Msg>>,
}

impl<Msg: Send + 'static> Command<Msg> {
    /// A command that does nothing.
    pub fn none() -> Self {
        Self { stream: None }
    }

    /// Runs `future` and converts its output into a message.
    ///
    /// # Examples
    ///
    /// ```
    /// use sprig::command::Command;
    ///
    /// async fn fetch_data() -> String {
    ///     "data".to_string()
    /// }
    ///
    /// enum Message {
    ///     DataReceived(String),
    /// }
    ///
    /// let cmd = Command::perform(fetch_data(), Message::DataReceived);
    /// ```
    pub fn perform<A>(
        future: impl Future<Output = A> + Send + 'static,
        f: impl FnOnce(A) -> Msg + Send + 'static,
    ) -> Self {
        Self::future(future.map(f))
    }

    /// Runs a future that produces the message directly.
    pub fn future(future: impl Future<Output = Msg> + Send + 'static) -> Self {
        Self {
            stream: Some(future.into_stream().boxed()),
        }
    }

    /// Emits `message` immediately.
    pub fn message(message: Msg) -> Self {
        Self {
            stream: Some(stream::once(async move { message }).boxed()),
        }
    }

    /// Runs a side effect that produces no message.
    pub fn effect(future: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            stream: Some(
                future
                    .into_stream()
                    .filter_map(|()| async { None })
                    .boxed(),
            ),
        }
    }

    /// Runs all commands concurrently. Message order across commands is not
    /// guaranteed; `Command::none()` entries are dropped.
    ///
    /// # Examples
    ///
    /// ```
    /// use sprig::command::Command;
    ///
    /// enum Message {
    ///     First(i32),
    ///     Second(String),
    /// }
    ///
    /// let cmd = Command::batch(vec![
    ///     Command::perform(async { 1 }, Message::First),
    ///     Command::perform(async { "data".to_string() }, Message::Second),
    ///     Command::none(),
    /// ]);
    /// ```
    pub fn batch(commands: impl IntoIterator<Item = Self>) -> Self {
        let streams: Vec<_> = commands.into_iter().filter_map(|cmd| cmd.stream).collect();

        if streams.is_empty() {
            Self::none()
        } else {
            Self {
                stream: Some(select_all(streams).boxed()),
            }
        }
    }

    /// Emits every item of `stream` as a message.
    pub fn stream(stream: impl Stream<Item = Msg> + Send + 'static) -> Self {
        Self {
            stream: Some(stream.boxed()),
        }
    }

    /// Emits every item of `stream` converted by `f`.
    pub fn run<A>(
        stream: impl Stream<Item = A> + Send + 'static,
        f: impl Fn(A) -> Msg + Send + 'static,
    ) -> Self {
        Self::stream(stream.map(f))
    }

    /// Converts the messages of this command.
    pub fn map<T: Send + 'static>(self, f: impl Fn(Msg) -> T + Send + 'static) -> Command<T> {
        Command {
            stream: self.stream.map(|stream| stream.map(f).boxed()),
        }
    }

    /// Returns `true` for a command without side effects.
    pub const fn is_none(&self) -> bool {
        self.stream.is_none()
    }

    /// Consumes the command, returning the stream of its messages.
    pub fn into_stream(self) -> BoxStream<'static, Msg> {
        self.stream.unwrap_or_else(|| stream::empty().boxed())
    }
}
