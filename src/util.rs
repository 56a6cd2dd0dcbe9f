pub(crate) use self::prebuffered::Prebuffered;

mod prebuffered;
